//! The derived aggregate: a rebuildable table of `(region, dataset, cell,
//! value)` rows joining sourcing locations to material production grids.
//!
//! The aggregate is a cache, never a source of truth. Its state is derived
//! from the store (no rows means [`AggregateState::Empty`]) so several
//! maintainers over one store agree on it without coordination.

use std::{collections::HashSet, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  cell::CellId,
  grid::{DatasetOwner, GridKind},
  region::RegionResolver,
  registry::{GridRegistry, YearFallback},
  store::ImpactStore,
};

/// One row of the derived aggregate. `dataset_id` is the id of the material
/// producer grid pointer and `value` the raw grid value of `cell`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
  pub region_id:  Uuid,
  pub dataset_id: Uuid,
  pub cell:       CellId,
  pub value:      f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateState {
  Empty,
  Populated,
}

/// Keeps the derived aggregate in sync with sourcing and grid data.
pub struct AggregateMaintainer<S> {
  store:    Arc<S>,
  registry: GridRegistry<S>,
  resolver: RegionResolver<S>,
}

impl<S> Clone for AggregateMaintainer<S> {
  fn clone(&self) -> Self {
    Self {
      store:    self.store.clone(),
      registry: self.registry.clone(),
      resolver: self.resolver.clone(),
    }
  }
}

impl<S: ImpactStore> AggregateMaintainer<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      registry: GridRegistry::new(store.clone()),
      resolver: RegionResolver::new(store.clone()),
      store,
    }
  }

  pub async fn state(&self) -> Result<AggregateState> {
    let rows = self
      .store
      .aggregate_row_count()
      .await
      .map_err(Error::store)?;
    Ok(if rows == 0 { AggregateState::Empty } else { AggregateState::Populated })
  }

  /// Populate the aggregate if it is empty; otherwise do nothing.
  ///
  /// Concurrent callers may both rebuild. Each rebuild is a whole-table
  /// replace, so the visible contents stay consistent.
  pub async fn ensure_fresh(&self) -> Result<AggregateState> {
    if self.state().await? == AggregateState::Populated {
      return Ok(AggregateState::Populated);
    }
    tracing::info!("derived aggregate is empty, running full build");
    self.rebuild().await
  }

  /// Recompute every derivable row and swap them in. Readers keep seeing the
  /// current contents until the swap; on failure those contents stay.
  pub async fn refresh(&self) -> Result<AggregateState> {
    tracing::info!("refreshing derived aggregate");
    self.rebuild().await
  }

  async fn rebuild(&self) -> Result<AggregateState> {
    let rows = self.compute_rows().await?;
    let count = rows.len();
    self
      .store
      .replace_aggregate(rows)
      .await
      .map_err(Error::store)?;
    tracing::info!(rows = count, "derived aggregate swapped in");
    Ok(if count == 0 { AggregateState::Empty } else { AggregateState::Populated })
  }

  /// The full derivable row set.
  pub async fn compute_rows(&self) -> Result<Vec<AggregateRow>> {
    let sources = self
      .store
      .aggregate_sources()
      .await
      .map_err(Error::store)?;

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for (region_id, material_id) in sources {
      let pointer = match self
        .registry
        .resolve(
          DatasetOwner::Material(material_id),
          GridKind::Producer,
          None,
          YearFallback::NearestEarlier,
        )
        .await
      {
        Ok(p) => p,
        Err(e) if e.is_not_found() => {
          tracing::debug!(%material_id, "no producer grid, skipping in aggregate");
          continue;
        }
        Err(e) => return Err(e),
      };
      if !seen.insert((region_id, pointer.id)) {
        continue;
      }

      let cells = self.resolver.uncompact(region_id, pointer.resolution).await?;
      let data = self
        .store
        .grid_values(&pointer, Some(&cells))
        .await
        .map_err(Error::store)?;

      rows.extend(data.values.into_iter().map(|(cell, value)| AggregateRow {
        region_id,
        dataset_id: pointer.id,
        cell,
        value,
      }));
    }
    Ok(rows)
  }

  /// Refresh on a fixed interval until the returned handle is aborted.
  /// Failures are logged and the previous contents stay in place.
  pub fn spawn_periodic_refresh(
    &self,
    every: Duration,
  ) -> tokio::task::JoinHandle<()> {
    let maintainer = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      // The first tick completes immediately.
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if let Err(e) = maintainer.refresh().await {
          tracing::error!(error = %e, "scheduled aggregate refresh failed");
        }
      }
    })
  }
}
