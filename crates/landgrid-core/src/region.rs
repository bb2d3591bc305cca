//! Regions and the region resolver.
//!
//! A region is stored as a compacted, mixed-resolution cell set. The resolver
//! expands it to every cell at a fixed resolution.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  cell::{self, CellId},
  store::ImpactStore,
};

/// A geographic area: an administrative boundary or a user-derived shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
  pub id:              Uuid,
  pub name:            Option<String>,
  /// Compacted cell set; may mix resolutions.
  pub cells:           BTreeSet<CellId>,
  /// Regions created by users are deletable; reference regions are not.
  pub created_by_user: bool,
  pub created_at:      DateTime<Utc>,
}

/// Input to [`ImpactStore::add_region`].
#[derive(Debug, Clone)]
pub struct NewRegion {
  pub name:            Option<String>,
  pub cells:           BTreeSet<CellId>,
  pub created_by_user: bool,
}

/// Expands regions to single-resolution cell sets.
pub struct RegionResolver<S> {
  store: Arc<S>,
}

impl<S> Clone for RegionResolver<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: ImpactStore> RegionResolver<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// The complete set of resolution-`resolution` cells covered by the
  /// region.
  pub async fn uncompact(
    &self,
    region_id: Uuid,
    resolution: u8,
  ) -> Result<BTreeSet<CellId>> {
    let region = self
      .store
      .get_region(region_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("region {region_id}")))?;

    cell::uncompact_cells(region.cells.iter().copied(), resolution).map_err(
      |e| match e {
        Error::InvalidArgument(msg) => {
          Error::InvalidArgument(format!("region {region_id}: {msg}"))
        }
        other => other,
      },
    )
  }
}
