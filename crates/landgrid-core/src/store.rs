//! The `ImpactStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `landgrid-store-sqlite`).
//! The engine and the HTTP layer depend on this abstraction, not on any
//! concrete backend.

use std::{
  collections::{BTreeSet, HashMap},
  future::Future,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  cache::{CacheEntry, CacheKind},
  cell::CellId,
  derived::AggregateRow,
  grid::{DatasetBinding, DatasetOwner, GridData, GridKind, GridPointer, NewGridDataset},
  reference::{Indicator, Material, UnitConversion},
  region::{NewRegion, Region},
  sourcing::{
    ActiveYears, IndicatorRecord, LocationType, NewIndicatorRecord, NewSourcingLocation,
    NewSourcingRecord, SourcingLocation, SourcingRecord,
  },
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`ImpactStore::find_sourcing_locations`].
///
/// Empty lists do not filter. All non-empty lists must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFilter {
  #[serde(default)]
  pub material_ids:      Vec<Uuid>,
  #[serde(default)]
  pub t1_supplier_ids:   Vec<Uuid>,
  #[serde(default)]
  pub producer_ids:      Vec<Uuid>,
  #[serde(default)]
  pub business_unit_ids: Vec<Uuid>,
  /// Admin region ids.
  #[serde(default)]
  pub origin_ids:        Vec<Uuid>,
  #[serde(default)]
  pub location_types:    Vec<LocationType>,
  /// `None` returns baseline rows only; `Some` returns baseline rows plus the
  /// rows of that scenario.
  pub scenario_id:       Option<Uuid>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Landgrid storage backend.
///
/// Sourcing data is append-only from the engine's point of view: scenario
/// forks add rows, and bulk deletes are reserved for external re-import
/// workflows. The derived aggregate and the cache are rebuildable.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait ImpactStore: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reference data ────────────────────────────────────────────────────

  fn put_material(
    &self,
    material: Material,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_material(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Material>, Self::Error>> + Send + '_;

  fn put_indicator(
    &self,
    indicator: Indicator,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_indicator(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Indicator>, Self::Error>> + Send + '_;

  fn put_unit_conversion(
    &self,
    conversion: UnitConversion,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_unit_conversion(
    &self,
    unit_id: Uuid,
  ) -> impl Future<Output = Result<Option<UnitConversion>, Self::Error>> + Send + '_;

  // ── Grid data ─────────────────────────────────────────────────────────

  /// Store a grid column (creating its table if needed) and register a
  /// pointer to it.
  fn create_grid_dataset(
    &self,
    dataset: NewGridDataset,
  ) -> impl Future<Output = Result<GridPointer, Self::Error>> + Send + '_;

  fn get_grid_pointer(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<GridPointer>, Self::Error>> + Send + '_;

  /// Read the values behind `pointer`, restricted to `cells` when given.
  fn grid_values<'a>(
    &'a self,
    pointer: &'a GridPointer,
    cells: Option<&'a BTreeSet<CellId>>,
  ) -> impl Future<Output = Result<GridData, Self::Error>> + Send + 'a;

  /// Append a binding of `owner` to a grid pointer for `year`.
  fn bind_dataset(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
    year: i32,
    grid_pointer_id: Uuid,
  ) -> impl Future<Output = Result<DatasetBinding, Self::Error>> + Send + '_;

  /// Every binding for `(owner, kind)` with its pointer, in creation order.
  fn bindings_for(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
  ) -> impl Future<Output = Result<Vec<(DatasetBinding, GridPointer)>, Self::Error>>
  + Send
  + '_;

  // ── Regions ───────────────────────────────────────────────────────────

  fn add_region(
    &self,
    region: NewRegion,
  ) -> impl Future<Output = Result<Region, Self::Error>> + Send + '_;

  fn get_region(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Region>, Self::Error>> + Send + '_;

  /// Delete every user-created region. Returns the number removed.
  fn delete_user_regions(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Sourcing ──────────────────────────────────────────────────────────

  /// Insert all locations in one transaction; either every row is written or
  /// none is.
  fn add_sourcing_locations(
    &self,
    locations: Vec<NewSourcingLocation>,
  ) -> impl Future<Output = Result<Vec<SourcingLocation>, Self::Error>> + Send + '_;

  fn get_sourcing_location(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<SourcingLocation>, Self::Error>> + Send + '_;

  fn find_sourcing_locations<'a>(
    &'a self,
    filter: &'a LocationFilter,
  ) -> impl Future<Output = Result<Vec<SourcingLocation>, Self::Error>> + Send + 'a;

  /// Baseline rows that have been forked inside `scenario_id`, keyed by id,
  /// with the years the fork replaces them in.
  fn forked_locations(
    &self,
    scenario_id: Uuid,
  ) -> impl Future<Output = Result<HashMap<Uuid, ActiveYears>, Self::Error>> + Send + '_;

  /// Delete the rows of one scenario. Baseline rows are never touched.
  fn delete_scenario_locations(
    &self,
    scenario_id: Uuid,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn add_sourcing_record(
    &self,
    record: NewSourcingRecord,
  ) -> impl Future<Output = Result<SourcingRecord, Self::Error>> + Send + '_;

  /// Records owned by any of `location_ids` with `start_year <= year <=
  /// end_year`. Backends must accept any number of ids.
  fn sourcing_records_for<'a>(
    &'a self,
    location_ids: &'a [Uuid],
    start_year: i32,
    end_year: i32,
  ) -> impl Future<Output = Result<Vec<SourcingRecord>, Self::Error>> + Send + 'a;

  fn add_indicator_record(
    &self,
    record: NewIndicatorRecord,
  ) -> impl Future<Output = Result<IndicatorRecord, Self::Error>> + Send + '_;

  /// Values of `indicator_ids` for any of `sourcing_record_ids`. Backends
  /// must accept any number of ids.
  fn indicator_records_for<'a>(
    &'a self,
    sourcing_record_ids: &'a [Uuid],
    indicator_ids: &'a [Uuid],
  ) -> impl Future<Output = Result<Vec<IndicatorRecord>, Self::Error>> + Send + 'a;

  // ── Derived aggregate ─────────────────────────────────────────────────

  /// Distinct `(region_id, material_id)` pairs across all sourcing locations.
  fn aggregate_sources(
    &self,
  ) -> impl Future<Output = Result<Vec<(Uuid, Uuid)>, Self::Error>> + Send + '_;

  fn aggregate_row_count(
    &self,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Replace the whole aggregate. Readers observe either the previous or the
  /// new contents, never a mix.
  fn replace_aggregate(
    &self,
    rows: Vec<AggregateRow>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Rows for the given `(region_id, dataset_id)` pairs.
  fn aggregate_rows<'a>(
    &'a self,
    keys: &'a [(Uuid, Uuid)],
  ) -> impl Future<Output = Result<Vec<AggregateRow>, Self::Error>> + Send + 'a;

  // ── Cache ─────────────────────────────────────────────────────────────

  fn cache_get<'a>(
    &'a self,
    hashed_key: &'a str,
    kind: CacheKind,
  ) -> impl Future<Output = Result<Option<CacheEntry>, Self::Error>> + Send + 'a;

  /// Insert or overwrite the entry for `(hashed_key, kind)`.
  fn cache_put(
    &self,
    entry: CacheEntry,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Truncate the cache. Returns the number of entries removed.
  fn cache_clear(
    &self,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
