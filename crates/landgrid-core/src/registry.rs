//! Grid pointer registry: which physical grid holds a logical dataset.

use std::sync::Arc;

use crate::{
  Error, Result,
  grid::{DatasetBinding, DatasetOwner, GridKind, GridPointer},
  store::ImpactStore,
};

/// How to treat a requested year that has no binding of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearFallback {
  /// Only a binding for exactly that year will do.
  Exact,
  /// Use the latest binding at or before that year.
  #[default]
  NearestEarlier,
}

/// Read-only lookup from dataset owners to grid pointers.
pub struct GridRegistry<S> {
  store: Arc<S>,
}

impl<S> Clone for GridRegistry<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: ImpactStore> GridRegistry<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Resolve `(owner, kind, year)` to a grid pointer.
  ///
  /// Without a year the latest binding wins. When several bindings share a
  /// year, the most recently created one supersedes the rest.
  pub async fn resolve(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
    year: Option<i32>,
    fallback: YearFallback,
  ) -> Result<GridPointer> {
    let bindings = self
      .store
      .bindings_for(owner, kind)
      .await
      .map_err(Error::store)?;

    select_binding(bindings, year, fallback)
      .map(|(_, pointer)| pointer)
      .ok_or_else(|| match year {
        Some(y) => Error::NotFound(format!(
          "no {kind} grid data for {owner} for year {y}"
        )),
        None => Error::NotFound(format!("no {kind} grid data for {owner}")),
      })
  }

  /// Years with a binding, ascending and de-duplicated.
  pub async fn available_years(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
  ) -> Result<Vec<i32>> {
    let mut years: Vec<i32> = self
      .store
      .bindings_for(owner, kind)
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|(b, _)| b.year)
      .collect();
    years.sort_unstable();
    years.dedup();
    Ok(years)
  }
}

fn select_binding(
  bindings: Vec<(DatasetBinding, GridPointer)>,
  year: Option<i32>,
  fallback: YearFallback,
) -> Option<(DatasetBinding, GridPointer)> {
  bindings
    .into_iter()
    .filter(|(b, _)| match (year, fallback) {
      (None, _) => true,
      (Some(y), YearFallback::Exact) => b.year == y,
      (Some(y), YearFallback::NearestEarlier) => b.year <= y,
    })
    .max_by_key(|(b, _)| (b.year, b.created_at))
}
