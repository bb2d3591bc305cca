//! Integration tests for `SqliteStore` and the engine running on top of it,
//! against an in-memory database.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use landgrid_core::{
  Error as CoreError,
  cell::CellId,
  derived::AggregateState,
  engine::{
    EngineSettings, GroupBy, ImpactEngine, ImpactMapRequest, ImpactTableRequest,
    RequestContext,
  },
  grid::{DatasetOwner, GridKind, GridValues, NewGridDataset},
  reference::{Indicator, Material, MaterialBasis, UnitConversion},
  region::NewRegion,
  registry::YearFallback,
  scenario::{InterventionAction, InterventionFilter, InterventionSpec, NewLocation},
  sourcing::{
    InterventionType, LocationType, NewIndicatorRecord, NewSourcingLocation,
    NewSourcingRecord,
  },
  store::{ImpactStore, LocationFilter},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn ctx() -> RequestContext { RequestContext::new(None) }

// ─── Fixture ─────────────────────────────────────────────────────────────────

/// One material, one indicator and one baseline location sourcing 30 t in
/// 2020 from a region whose seven resolution-2 cells carry:
///
/// | cell | production | indicator |
/// |------|------------|-----------|
/// | c0   | 10         | 2         |
/// | c1   | 5          | 1         |
///
/// so the impact per tonne is `(10·2 + 5·1) / 15 = 5/3` and the 2020
/// impact is 50.
struct Fixture {
  store:        Arc<SqliteStore>,
  engine:       ImpactEngine<SqliteStore>,
  material_id:  Uuid,
  indicator_id: Uuid,
  region_id:    Uuid,
  location_id:  Uuid,
  record_id:    Uuid,
  parent:       CellId,
  cells:        Vec<CellId>,
}

async fn fixture() -> Fixture {
  let store = Arc::new(store().await);

  let material_id = Uuid::new_v4();
  let indicator_id = Uuid::new_v4();
  let unit_id = Uuid::new_v4();
  store
    .put_material(Material { id: material_id, name: "Cotton".into() })
    .await
    .unwrap();
  store
    .put_unit_conversion(UnitConversion {
      unit_id,
      symbol: "ha".into(),
      factor: Some(0.5),
    })
    .await
    .unwrap();
  store
    .put_indicator(Indicator {
      id:             indicator_id,
      name:           "Deforestation".into(),
      name_code:      "DF_LUC_T".into(),
      unit_id:        Some(unit_id),
      material_basis: MaterialBasis::Producer,
    })
    .await
    .unwrap();

  let parent = CellId::base(8).unwrap().children(1).unwrap()[0];
  let cells = parent.children(2).unwrap();

  let producer = store
    .create_grid_dataset(NewGridDataset {
      table_name:  "h3_grid_material".into(),
      column_name: "cotton_prod_2020".into(),
      resolution:  2,
      year:        Some(2020),
      kind:        GridKind::Producer,
      values:      GridValues::from([(cells[0], 10.0), (cells[1], 5.0)]),
    })
    .await
    .unwrap();
  store
    .bind_dataset(DatasetOwner::Material(material_id), GridKind::Producer, 2020, producer.id)
    .await
    .unwrap();

  let indicator = store
    .create_grid_dataset(NewGridDataset {
      table_name:  "h3_grid_indicator".into(),
      column_name: "df_2020".into(),
      resolution:  2,
      year:        Some(2020),
      kind:        GridKind::Indicator,
      values:      GridValues::from([(cells[0], 2.0), (cells[1], 1.0)]),
    })
    .await
    .unwrap();
  store
    .bind_dataset(
      DatasetOwner::Indicator(indicator_id),
      GridKind::Indicator,
      2020,
      indicator.id,
    )
    .await
    .unwrap();

  let region = store
    .add_region(NewRegion {
      name:            Some("Mato Grosso".into()),
      cells:           BTreeSet::from([parent]),
      created_by_user: false,
    })
    .await
    .unwrap();

  let mut location = NewSourcingLocation::baseline(material_id, region.id, Uuid::new_v4());
  location.t1_supplier_id = Some(Uuid::new_v4());
  location.location_type = LocationType::CountryOfProduction;
  let location = store
    .add_sourcing_locations(vec![location])
    .await
    .unwrap()
    .remove(0);
  let record = store
    .add_sourcing_record(NewSourcingRecord {
      sourcing_location_id: location.id,
      year:                 2020,
      volume:               30.0,
    })
    .await
    .unwrap();

  let engine = ImpactEngine::new(
    store.clone(),
    EngineSettings { resolution: 2, growth_rate: 1.5 },
  );

  Fixture {
    store,
    engine,
    material_id,
    indicator_id,
    region_id: region.id,
    location_id: location.id,
    record_id: record.id,
    parent,
    cells,
  }
}

fn table_request(f: &Fixture, scenario_id: Option<Uuid>) -> ImpactTableRequest {
  ImpactTableRequest {
    indicator_ids: vec![f.indicator_id],
    start_year:    2020,
    end_year:      2021,
    group_by:      GroupBy::Material,
    filter:        LocationFilter { scenario_id, ..Default::default() },
  }
}

/// A region made of the single cell `c0`: production 10, indicator 2.
async fn single_cell_region(f: &Fixture) -> Uuid {
  f.store
    .add_region(NewRegion {
      name:            None,
      cells:           BTreeSet::from([f.cells[0]]),
      created_by_user: true,
    })
    .await
    .unwrap()
    .id
}

fn assert_close(a: f64, b: f64) {
  assert!((a - b).abs() < 1e-9, "{a} != {b}");
}

/// An indicator with no grid bound to it.
async fn indicator_without_grid(f: &Fixture) -> Uuid {
  let id = Uuid::new_v4();
  f.store
    .put_indicator(Indicator {
      id,
      name:           "Water".into(),
      name_code:      "UWU_T".into(),
      unit_id:        None,
      material_basis: MaterialBasis::Harvest,
    })
    .await
    .unwrap();
  id
}

/// Attribute `value` of the fixture indicator to the 2020 purchase.
async fn record_impact(f: &Fixture, value: f64) {
  f.store
    .add_indicator_record(NewIndicatorRecord {
      sourcing_record_id: f.record_id,
      indicator_id: f.indicator_id,
      value,
    })
    .await
    .unwrap();
}

async fn add_purchase(f: &Fixture, year: i32, volume: f64) {
  f.store
    .add_sourcing_record(NewSourcingRecord { sourcing_location_id: f.location_id, year, volume })
    .await
    .unwrap();
}

fn map_request(f: &Fixture, scenario_id: Option<Uuid>) -> ImpactMapRequest {
  ImpactMapRequest {
    indicator_ids: vec![f.indicator_id],
    year:          2020,
    resolution:    2,
    filter:        LocationFilter { scenario_id, ..Default::default() },
  }
}

// ─── Reference data ──────────────────────────────────────────────────────────

#[tokio::test]
async fn reference_data_round_trips() {
  let f = fixture().await;

  let material = f.store.get_material(f.material_id).await.unwrap().unwrap();
  assert_eq!(material.name, "Cotton");

  let indicator = f.store.get_indicator(f.indicator_id).await.unwrap().unwrap();
  assert_eq!(indicator.name_code, "DF_LUC_T");
  assert_eq!(indicator.material_basis, MaterialBasis::Producer);

  let unit = f
    .store
    .get_unit_conversion(indicator.unit_id.unwrap())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(unit.factor, Some(0.5));

  assert!(f.store.get_material(Uuid::new_v4()).await.unwrap().is_none());
}

// ─── Grid data ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn grid_values_can_be_restricted_to_cells() {
  let f = fixture().await;
  let pointer = f
    .engine
    .registry()
    .resolve(
      DatasetOwner::Material(f.material_id),
      GridKind::Producer,
      None,
      YearFallback::Exact,
    )
    .await
    .unwrap();

  let all = f.store.grid_values(&pointer, None).await.unwrap();
  assert_eq!(all.values.len(), 2);

  let only = BTreeSet::from([f.cells[1], f.cells[5]]);
  let some = f.store.grid_values(&pointer, Some(&only)).await.unwrap();
  assert_eq!(some.values, GridValues::from([(f.cells[1], 5.0)]));
}

#[tokio::test]
async fn second_column_shares_a_grid_table() {
  let f = fixture().await;
  let pointer = f
    .store
    .create_grid_dataset(NewGridDataset {
      table_name:  "h3_grid_material".into(),
      column_name: "cotton_prod_2021".into(),
      resolution:  2,
      year:        Some(2021),
      kind:        GridKind::Producer,
      values:      GridValues::from([(f.cells[3], 7.0)]),
    })
    .await
    .unwrap();

  let values = f.store.grid_values(&pointer, None).await.unwrap().values;
  assert_eq!(values, GridValues::from([(f.cells[3], 7.0)]));
  let stored = f.store.get_grid_pointer(pointer.id).await.unwrap().unwrap();
  assert_eq!(stored, pointer);
}

#[tokio::test]
async fn grid_identifiers_must_be_plain() {
  let s = store().await;
  let err = s
    .create_grid_dataset(NewGridDataset {
      table_name:  "grid; DROP TABLE regions".into(),
      column_name: "v".into(),
      resolution:  0,
      year:        None,
      kind:        GridKind::Indicator,
      values:      GridValues::new(),
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::InvalidIdentifier(_)));
}

#[tokio::test]
async fn binding_to_missing_pointer_fails() {
  let s = store().await;
  let missing = Uuid::new_v4();
  let err = s
    .bind_dataset(DatasetOwner::Material(Uuid::new_v4()), GridKind::Producer, 2020, missing)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::GridPointerNotFound(id) if id == missing));
}

// ─── Registry ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn registry_year_fallback() {
  let f = fixture().await;
  let owner = DatasetOwner::Material(f.material_id);
  let pointer_2010 = f
    .store
    .create_grid_dataset(NewGridDataset {
      table_name:  "h3_grid_material".into(),
      column_name: "cotton_prod_2010".into(),
      resolution:  2,
      year:        Some(2010),
      kind:        GridKind::Producer,
      values:      GridValues::from([(f.cells[0], 1.0)]),
    })
    .await
    .unwrap();
  f.store
    .bind_dataset(owner, GridKind::Producer, 2010, pointer_2010.id)
    .await
    .unwrap();

  let registry = f.engine.registry();
  let nearest = registry
    .resolve(owner, GridKind::Producer, Some(2015), YearFallback::NearestEarlier)
    .await
    .unwrap();
  assert_eq!(nearest.id, pointer_2010.id);

  let err = registry
    .resolve(owner, GridKind::Producer, Some(2015), YearFallback::Exact)
    .await
    .unwrap_err();
  assert!(err.to_string().contains(&f.material_id.to_string()));

  let latest = registry
    .resolve(owner, GridKind::Producer, None, YearFallback::Exact)
    .await
    .unwrap();
  assert_eq!(latest.year, Some(2020));

  assert_eq!(
    registry.available_years(owner, GridKind::Producer).await.unwrap(),
    vec![2010, 2020]
  );
}

#[tokio::test]
async fn newer_binding_supersedes_older_for_same_year() {
  let f = fixture().await;
  let owner = DatasetOwner::Material(f.material_id);
  let corrected = f
    .store
    .create_grid_dataset(NewGridDataset {
      table_name:  "h3_grid_material".into(),
      column_name: "cotton_prod_2020_v2".into(),
      resolution:  2,
      year:        Some(2020),
      kind:        GridKind::Producer,
      values:      GridValues::from([(f.cells[0], 11.0)]),
    })
    .await
    .unwrap();
  f.store
    .bind_dataset(owner, GridKind::Producer, 2020, corrected.id)
    .await
    .unwrap();

  let resolved = f
    .engine
    .registry()
    .resolve(owner, GridKind::Producer, Some(2020), YearFallback::Exact)
    .await
    .unwrap();
  assert_eq!(resolved.id, corrected.id);
}

// ─── Regions ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn region_uncompacts_to_target_resolution() {
  let f = fixture().await;
  let cells = f.engine.resolver().uncompact(f.region_id, 2).await.unwrap();
  assert_eq!(cells.len(), 7);
  assert_eq!(cells, f.cells.iter().copied().collect());

  let err = f.engine.resolver().uncompact(f.region_id, 0).await.unwrap_err();
  assert!(matches!(err, CoreError::InvalidArgument(_)));

  let err = f.engine.resolver().uncompact(Uuid::new_v4(), 2).await.unwrap_err();
  assert!(err.is_not_found());
}

#[tokio::test]
async fn only_user_regions_are_bulk_deleted() {
  let f = fixture().await;
  let user_region = single_cell_region(&f).await;

  assert_eq!(f.store.delete_user_regions().await.unwrap(), 1);
  assert!(f.store.get_region(user_region).await.unwrap().is_none());
  let kept = f.store.get_region(f.region_id).await.unwrap().unwrap();
  assert_eq!(kept.cells, BTreeSet::from([f.parent]));
}

// ─── Sourcing ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn find_locations_applies_every_filter() {
  let f = fixture().await;
  let other_material = Uuid::new_v4();
  f.store
    .add_sourcing_locations(vec![NewSourcingLocation::baseline(
      other_material,
      f.region_id,
      Uuid::new_v4(),
    )])
    .await
    .unwrap();

  let all = f
    .store
    .find_sourcing_locations(&LocationFilter::default())
    .await
    .unwrap();
  assert_eq!(all.len(), 2);

  let cotton = f
    .store
    .find_sourcing_locations(&LocationFilter {
      material_ids: vec![f.material_id],
      location_types: vec![LocationType::CountryOfProduction],
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(cotton.len(), 1);
  assert_eq!(cotton[0].id, f.location_id);

  let none = f
    .store
    .find_sourcing_locations(&LocationFilter {
      material_ids: vec![other_material],
      location_types: vec![LocationType::CountryOfProduction],
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(none.is_empty());
}

#[tokio::test]
async fn records_are_filtered_by_year() {
  let f = fixture().await;
  f.store
    .add_sourcing_record(NewSourcingRecord {
      sourcing_location_id: f.location_id,
      year:                 2023,
      volume:               12.0,
    })
    .await
    .unwrap();

  let records = f
    .store
    .sourcing_records_for(&[f.location_id], 2019, 2021)
    .await
    .unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].id, f.record_id);
  assert!(f.store.sourcing_records_for(&[], 2019, 2021).await.unwrap().is_empty());
}

#[tokio::test]
async fn id_lists_beyond_the_variable_limit_are_read() {
  let f = fixture().await;
  record_impact(&f, 45.0).await;

  let mut location_ids: Vec<Uuid> = (0..40_000).map(|_| Uuid::new_v4()).collect();
  location_ids.push(f.location_id);
  let records = f
    .store
    .sourcing_records_for(&location_ids, 2020, 2020)
    .await
    .unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].id, f.record_id);

  let mut record_ids: Vec<Uuid> = (0..40_000).map(|_| Uuid::new_v4()).collect();
  record_ids.insert(20_000, f.record_id);
  let values = f
    .store
    .indicator_records_for(&record_ids, &[f.indicator_id])
    .await
    .unwrap();
  assert_eq!(values.len(), 1);
  assert_eq!(values[0].value, 45.0);
}

// ─── Derived aggregate ───────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_fresh_populates_once() {
  let f = fixture().await;
  let maintainer = f.engine.maintainer();
  assert_eq!(maintainer.state().await.unwrap(), AggregateState::Empty);

  assert_eq!(maintainer.ensure_fresh().await.unwrap(), AggregateState::Populated);
  assert_eq!(f.store.aggregate_row_count().await.unwrap(), 2);

  assert_eq!(maintainer.ensure_fresh().await.unwrap(), AggregateState::Populated);
  assert_eq!(f.store.aggregate_row_count().await.unwrap(), 2);
}

#[tokio::test]
async fn readers_see_whole_snapshots_during_refresh() {
  let f = fixture().await;
  f.engine.maintainer().ensure_fresh().await.unwrap();

  let second = single_cell_region(&f).await;
  f.store
    .add_sourcing_locations(vec![NewSourcingLocation::baseline(
      f.material_id,
      second,
      Uuid::new_v4(),
    )])
    .await
    .unwrap();

  let maintainer = f.engine.maintainer().clone();
  let refresher = tokio::spawn(async move {
    for _ in 0..5 {
      maintainer.refresh().await.unwrap();
    }
  });

  for _ in 0..50 {
    let count = f.store.aggregate_row_count().await.unwrap();
    assert!(count == 2 || count == 3, "saw partial aggregate of {count} rows");
    tokio::task::yield_now().await;
  }
  refresher.await.unwrap();
  assert_eq!(f.store.aggregate_row_count().await.unwrap(), 3);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_contents() {
  let f = fixture().await;
  f.engine.maintainer().ensure_fresh().await.unwrap();

  // A location whose region does not exist makes the rebuild fail.
  f.store
    .add_sourcing_locations(vec![NewSourcingLocation::baseline(
      f.material_id,
      Uuid::new_v4(),
      Uuid::new_v4(),
    )])
    .await
    .unwrap();

  assert!(f.engine.maintainer().refresh().await.unwrap_err().is_not_found());
  assert_eq!(f.store.aggregate_row_count().await.unwrap(), 2);
}

// ─── Impact table ────────────────────────────────────────────────────────────

#[tokio::test]
async fn impact_table_weights_by_production() {
  let f = fixture().await;
  let table = f
    .engine
    .get_impact_table(&ctx(), &table_request(&f, None))
    .await
    .unwrap();

  let indicator = &table.indicators[0];
  assert_eq!(indicator.indicator_name, "Deforestation");
  assert_eq!(indicator.unit.as_deref(), Some("ha"));
  assert_eq!(indicator.rows.len(), 1);
  assert_eq!(indicator.rows[0].group_key, f.material_id.to_string());

  let values = &indicator.rows[0].values;
  assert_close(values[0].value, 50.0);
  assert!(!values[0].is_projected);
  assert_close(values[1].value, 50.0 * 1.015);
  assert!(values[1].is_projected);

  assert_close(indicator.year_sum[0].value, 50.0);
  assert_close(table.purchased_volume[0].value, 30.0);
}

#[tokio::test]
async fn repeated_impact_table_is_served_from_cache() {
  let f = fixture().await;
  let mut request = table_request(&f, None);
  request.filter.material_ids = vec![f.material_id];
  request.start_year = 2018;
  request.end_year = 2020;

  let first = f.engine.get_impact_table(&ctx(), &request).await.unwrap();
  let computed = f.engine.aggregator().invocations();
  assert!(computed > 0);

  let second = f.engine.get_impact_table(&ctx(), &request).await.unwrap();
  assert_eq!(f.engine.aggregator().invocations(), computed);
  assert_eq!(first, second);
}

#[tokio::test]
async fn impact_table_requires_indicator_grid() {
  let f = fixture().await;
  let bare = indicator_without_grid(&f).await;

  let mut request = table_request(&f, None);
  request.indicator_ids.push(bare);
  let err = f.engine.get_impact_table(&ctx(), &request).await.unwrap_err();
  assert!(err.is_not_found());
  assert!(err.to_string().contains(&bare.to_string()));
}

#[tokio::test]
async fn impact_table_fills_gaps_from_previous_year() {
  let f = fixture().await;
  add_purchase(&f, 2018, 30.0).await;

  let mut request = table_request(&f, None);
  request.start_year = 2018;
  request.end_year = 2020;
  let table = f.engine.get_impact_table(&ctx(), &request).await.unwrap();

  // 2018 falls back to the 2020 grids, so it also comes to 50.
  let values = &table.indicators[0].rows[0].values;
  assert_close(values[0].value, 50.0);
  assert_close(values[1].value, 50.0 * 1.015);
  assert_close(values[2].value, 50.0);
  assert!(values.iter().all(|v| !v.is_projected));
  assert_close(table.indicators[0].year_sum[1].value, 50.0 * 1.015);
  assert_close(table.purchased_volume[1].value, 30.0 * 1.015);
}

#[tokio::test]
async fn impact_table_rejects_inverted_years() {
  let f = fixture().await;
  let mut request = table_request(&f, None);
  request.start_year = 2022;
  let err = f.engine.get_impact_table(&ctx(), &request).await.unwrap_err();
  assert!(matches!(err, CoreError::InvalidArgument(_)));
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

fn move_to(region_id: Uuid, material_id: Uuid) -> InterventionSpec {
  InterventionSpec {
    title:      "Source from the north".into(),
    start_year: 2020,
    end_year:   Some(2021),
    filter:     InterventionFilter { material_ids: vec![material_id], ..Default::default() },
    action:     InterventionAction::NewSupplier {
      t1_supplier_id: None,
      producer_id:    Some(Uuid::new_v4()),
      location:       NewLocation {
        location_type:      LocationType::PointOfProduction,
        country:            "Brazil".into(),
        admin_region_input: None,
        address:            None,
        latitude:           Some(-12.0),
        longitude:          Some(-55.5),
        region_id,
        admin_region_id:    Uuid::new_v4(),
      },
    },
  }
}

#[tokio::test]
async fn fork_leaves_baseline_intact() {
  let f = fixture().await;
  let before = f.store.get_sourcing_location(f.location_id).await.unwrap().unwrap();
  let target = single_cell_region(&f).await;
  let scenario = Uuid::new_v4();

  let created = f
    .engine
    .fork_scenario(&ctx(), scenario, &move_to(target, f.material_id))
    .await
    .unwrap();
  assert_eq!(created.len(), 1);

  let after = f.store.get_sourcing_location(f.location_id).await.unwrap().unwrap();
  assert_eq!(before, after);

  let forked = f.store.get_sourcing_location(created[0]).await.unwrap().unwrap();
  assert_eq!(forked.intervention_type, InterventionType::Replacing);
  assert_eq!(forked.scenario_id, Some(scenario));
  assert_eq!(forked.forked_from, Some(f.location_id));
  assert_eq!(forked.material_id, f.material_id);
  assert_eq!(forked.region_id, target);

  let baseline = f
    .store
    .find_sourcing_locations(&LocationFilter::default())
    .await
    .unwrap();
  assert_eq!(baseline, vec![before]);
}

#[tokio::test]
async fn scenario_view_reads_forked_rows() {
  let f = fixture().await;
  let target = single_cell_region(&f).await;
  let scenario = Uuid::new_v4();
  f.engine
    .fork_scenario(&ctx(), scenario, &move_to(target, f.material_id))
    .await
    .unwrap();

  // c0 alone: 30 t · (10·2 / 10) = 60.
  let table = f
    .engine
    .get_impact_table(&ctx(), &table_request(&f, Some(scenario)))
    .await
    .unwrap();
  assert_close(table.indicators[0].rows[0].values[0].value, 60.0);
  assert_close(table.purchased_volume[0].value, 30.0);

  let baseline = f
    .engine
    .get_impact_table(&ctx(), &table_request(&f, None))
    .await
    .unwrap();
  assert_close(baseline.indicators[0].rows[0].values[0].value, 50.0);
}

#[tokio::test]
async fn forking_twice_in_one_scenario_adds_nothing() {
  let f = fixture().await;
  let target = single_cell_region(&f).await;
  let scenario = Uuid::new_v4();
  let spec = move_to(target, f.material_id);
  f.engine.fork_scenario(&ctx(), scenario, &spec).await.unwrap();

  let err = f.engine.fork_scenario(&ctx(), scenario, &spec).await.unwrap_err();
  assert!(matches!(err, CoreError::ValidationAggregate(_)));
  assert_eq!(f.store.forked_locations(scenario).await.unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_intervention_writes_nothing() {
  let f = fixture().await;
  let mut spec = move_to(f.region_id, f.material_id);
  if let InterventionAction::NewSupplier { location, .. } = &mut spec.action {
    location.country.clear();
    location.latitude = Some(120.0);
  }
  spec.end_year = Some(2019);

  let err = f
    .engine
    .fork_scenario(&ctx(), Uuid::new_v4(), &spec)
    .await
    .unwrap_err();
  let CoreError::ValidationAggregate(problems) = err else {
    panic!("expected validation aggregate, got {err:?}");
  };
  assert_eq!(problems.len(), 3, "{problems:?}");

  let everything = f
    .store
    .find_sourcing_locations(&LocationFilter::default())
    .await
    .unwrap();
  assert_eq!(everything.len(), 1);
}

#[tokio::test]
async fn deleting_a_scenario_keeps_baseline() {
  let f = fixture().await;
  let target = single_cell_region(&f).await;
  let scenario = Uuid::new_v4();
  f.engine
    .fork_scenario(&ctx(), scenario, &move_to(target, f.material_id))
    .await
    .unwrap();

  assert_eq!(f.store.delete_scenario_locations(scenario).await.unwrap(), 1);
  assert!(f.store.forked_locations(scenario).await.unwrap().is_empty());
  assert!(f.store.get_sourcing_location(f.location_id).await.unwrap().is_some());
}

#[tokio::test]
async fn intervention_only_covers_its_years() {
  let f = fixture().await;
  add_purchase(&f, 2021, 30.0).await;
  add_purchase(&f, 2022, 30.0).await;
  let target = single_cell_region(&f).await;
  let scenario = Uuid::new_v4();
  let mut spec = move_to(target, f.material_id);
  spec.start_year = 2021;
  spec.end_year = Some(2021);
  f.engine.fork_scenario(&ctx(), scenario, &spec).await.unwrap();

  let mut request = table_request(&f, Some(scenario));
  request.end_year = 2022;
  let table = f.engine.get_impact_table(&ctx(), &request).await.unwrap();

  let values = &table.indicators[0].rows[0].values;
  assert_close(values[0].value, 50.0);
  assert_close(values[1].value, 60.0);
  assert_close(values[2].value, 50.0);
  for volume in &table.purchased_volume {
    assert_close(volume.value, 30.0);
  }
}

#[tokio::test]
async fn fork_succeeds_when_aggregate_refresh_fails() {
  let f = fixture().await;
  // A baseline row in an unknown region breaks every aggregate refresh.
  f.store
    .add_sourcing_locations(vec![NewSourcingLocation::baseline(
      f.material_id,
      Uuid::new_v4(),
      Uuid::new_v4(),
    )])
    .await
    .unwrap();
  assert!(f.engine.maintainer().refresh().await.is_err());
  f.engine
    .get_risk_map(&ctx(), f.material_id, f.indicator_id, None)
    .await
    .unwrap();

  let target = single_cell_region(&f).await;
  let created = f
    .engine
    .fork_scenario(&ctx(), Uuid::new_v4(), &move_to(target, f.material_id))
    .await
    .unwrap();
  assert_eq!(created.len(), 2);
  assert_eq!(f.engine.cache().clear().await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_scenario_hides_baseline() {
  let f = fixture().await;
  record_impact(&f, 45.0).await;
  let scenario = Uuid::new_v4();
  let spec = InterventionSpec {
    title:      "Stop buying cotton".into(),
    start_year: 2020,
    end_year:   None,
    filter:     InterventionFilter { material_ids: vec![f.material_id], ..Default::default() },
    action:     InterventionAction::Cancel,
  };
  let created = f.engine.fork_scenario(&ctx(), scenario, &spec).await.unwrap();
  let cancelled = f.store.get_sourcing_location(created[0]).await.unwrap().unwrap();
  assert_eq!(cancelled.intervention_type, InterventionType::Cancelled);

  let table = f
    .engine
    .get_impact_table(&ctx(), &table_request(&f, Some(scenario)))
    .await
    .unwrap();
  assert!(table.indicators[0].rows.is_empty());
  assert!(table.indicators[0].year_sum.iter().all(|y| y.value == 0.0));
  assert!(table.purchased_volume.iter().all(|y| y.value == 0.0));

  let map = f
    .engine
    .get_impact_map(&ctx(), &map_request(&f, Some(scenario)))
    .await
    .unwrap();
  assert!(map.data.is_empty());

  let baseline = f
    .engine
    .get_impact_map(&ctx(), &map_request(&f, None))
    .await
    .unwrap();
  assert_eq!(baseline.data.len(), 2);
}

fn halve_impact(f: &Fixture, indicator_id: Uuid) -> InterventionSpec {
  InterventionSpec {
    title:      "Better practices".into(),
    start_year: 2020,
    end_year:   None,
    filter:     InterventionFilter { material_ids: vec![f.material_id], ..Default::default() },
    action:     InterventionAction::ChangeEfficiency {
      coefficients: BTreeMap::from([(indicator_id, 0.5)]),
    },
  }
}

#[tokio::test]
async fn efficiency_change_scales_scenario_impact() {
  let f = fixture().await;
  record_impact(&f, 45.0).await;
  let scenario = Uuid::new_v4();
  let created = f
    .engine
    .fork_scenario(&ctx(), scenario, &halve_impact(&f, f.indicator_id))
    .await
    .unwrap();

  let forked = f.store.get_sourcing_location(created[0]).await.unwrap().unwrap();
  assert_eq!(forked.intervention_type, InterventionType::Replacing);
  assert_eq!(forked.region_id, f.region_id);
  assert_eq!(forked.coefficient(f.indicator_id), 0.5);

  let table = f
    .engine
    .get_impact_table(&ctx(), &table_request(&f, Some(scenario)))
    .await
    .unwrap();
  assert_close(table.indicators[0].rows[0].values[0].value, 25.0);
  assert_close(table.purchased_volume[0].value, 30.0);

  let map = f
    .engine
    .get_impact_map(&ctx(), &map_request(&f, Some(scenario)))
    .await
    .unwrap();
  let total: f64 = map.data.iter().map(|c| c.value).sum();
  assert_close(total, 22.5);

  let baseline = f
    .engine
    .get_impact_table(&ctx(), &table_request(&f, None))
    .await
    .unwrap();
  assert_close(baseline.indicators[0].rows[0].values[0].value, 50.0);
}

#[tokio::test]
async fn efficiency_change_needs_known_indicators() {
  let f = fixture().await;
  let scenario = Uuid::new_v4();
  let unknown = Uuid::new_v4();
  let err = f
    .engine
    .fork_scenario(&ctx(), scenario, &halve_impact(&f, unknown))
    .await
    .unwrap_err();
  assert!(err.is_not_found());
  assert!(err.to_string().contains(&unknown.to_string()));
  assert!(f.store.forked_locations(scenario).await.unwrap().is_empty());
}

// ─── Impact map ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn impact_map_distributes_by_production() {
  let f = fixture().await;
  f.store
    .add_indicator_record(NewIndicatorRecord {
      sourcing_record_id: f.record_id,
      indicator_id:       f.indicator_id,
      value:              45.0,
    })
    .await
    .unwrap();

  let mut request = ImpactMapRequest {
    indicator_ids: vec![f.indicator_id],
    year:          2020,
    resolution:    2,
    filter:        LocationFilter::default(),
  };
  let fine = f.engine.get_impact_map(&ctx(), &request).await.unwrap();
  assert_eq!(fine.data.len(), 2);
  let value_of = |cell: CellId| {
    fine
      .data
      .iter()
      .find(|c| c.cell == cell)
      .map(|c| c.value)
      .unwrap()
  };
  assert_close(value_of(f.cells[0]), 30.0);
  assert_close(value_of(f.cells[1]), 15.0);
  assert_close(fine.metadata.quantiles[6], 30.0);
  assert_eq!(fine.metadata.unit.as_deref(), Some("ha"));

  request.resolution = 1;
  let coarse = f.engine.get_impact_map(&ctx(), &request).await.unwrap();
  assert_eq!(coarse.data.len(), 1);
  assert_eq!(coarse.data[0].cell, f.parent);
  assert_close(coarse.data[0].value, 45.0);

  assert_eq!(f.engine.maintainer().state().await.unwrap(), AggregateState::Populated);
}

#[tokio::test]
async fn impact_map_rejects_resolution_finer_than_aggregate() {
  let f = fixture().await;
  let request = ImpactMapRequest {
    indicator_ids: vec![f.indicator_id],
    year:          2020,
    resolution:    3,
    filter:        LocationFilter::default(),
  };
  let err = f.engine.get_impact_map(&ctx(), &request).await.unwrap_err();
  assert!(matches!(err, CoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn impact_map_requires_indicator_grid() {
  let f = fixture().await;
  let bare = indicator_without_grid(&f).await;

  let mut request = map_request(&f, None);
  request.indicator_ids.push(bare);
  let err = f.engine.get_impact_map(&ctx(), &request).await.unwrap_err();
  assert!(err.is_not_found());
  assert!(err.to_string().contains(&bare.to_string()));
}

#[tokio::test]
async fn impact_map_follows_scenario_rows() {
  let f = fixture().await;
  record_impact(&f, 45.0).await;
  let target = single_cell_region(&f).await;
  let scenario = Uuid::new_v4();
  f.engine
    .fork_scenario(&ctx(), scenario, &move_to(target, f.material_id))
    .await
    .unwrap();

  let moved = f
    .engine
    .get_impact_map(&ctx(), &map_request(&f, Some(scenario)))
    .await
    .unwrap();
  assert_eq!(moved.data.len(), 1);
  assert_eq!(moved.data[0].cell, f.cells[0]);
  assert_close(moved.data[0].value, 45.0);

  let baseline = f
    .engine
    .get_impact_map(&ctx(), &map_request(&f, None))
    .await
    .unwrap();
  assert_eq!(baseline.data.len(), 2);
}

#[tokio::test]
async fn impact_map_leaves_mixed_units_blank() {
  let f = fixture().await;
  record_impact(&f, 45.0).await;

  let unit_id = Uuid::new_v4();
  f.store
    .put_unit_conversion(UnitConversion { unit_id, symbol: "m3".into(), factor: None })
    .await
    .unwrap();
  let water = Uuid::new_v4();
  f.store
    .put_indicator(Indicator {
      id:             water,
      name:           "Water use".into(),
      name_code:      "UWU_T".into(),
      unit_id:        Some(unit_id),
      material_basis: MaterialBasis::Producer,
    })
    .await
    .unwrap();
  let grid = f
    .store
    .create_grid_dataset(NewGridDataset {
      table_name:  "h3_grid_indicator".into(),
      column_name: "water_2020".into(),
      resolution:  2,
      year:        Some(2020),
      kind:        GridKind::Indicator,
      values:      GridValues::from([(f.cells[0], 4.0)]),
    })
    .await
    .unwrap();
  f.store
    .bind_dataset(DatasetOwner::Indicator(water), GridKind::Indicator, 2020, grid.id)
    .await
    .unwrap();
  f.store
    .add_indicator_record(NewIndicatorRecord {
      sourcing_record_id: f.record_id,
      indicator_id:       water,
      value:              12.0,
    })
    .await
    .unwrap();

  let mut request = map_request(&f, None);
  request.indicator_ids.push(water);
  let map = f.engine.get_impact_map(&ctx(), &request).await.unwrap();
  assert_eq!(map.metadata.unit, None);
  let total: f64 = map.data.iter().map(|c| c.value).sum();
  assert_close(total, 57.0);
}

// ─── Risk map ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn risk_map_multiplies_grids_by_unit_factor() {
  let f = fixture().await;
  let map = f
    .engine
    .get_risk_map(&ctx(), f.material_id, f.indicator_id, None)
    .await
    .unwrap();

  assert_eq!(map.data.len(), 2);
  let total: f64 = map.data.iter().map(|c| c.value).sum();
  assert_close(total, 2.0 * 10.0 * 0.5 + 1.0 * 5.0 * 0.5);
  assert_eq!(map.metadata.indicator_year, Some(2020));
  assert_eq!(map.metadata.material_year, Some(2020));

  let again = f
    .engine
    .get_risk_map(&ctx(), f.material_id, f.indicator_id, Some(2020))
    .await
    .unwrap();
  assert_eq!(map.data, again.data);
}

#[tokio::test]
async fn risk_map_names_missing_indicator_grid() {
  let f = fixture().await;
  let indicator = Uuid::new_v4();
  f.store
    .put_indicator(Indicator {
      id:             indicator,
      name:           "Carbon".into(),
      name_code:      "GHG_LUC_T".into(),
      unit_id:        None,
      material_basis: MaterialBasis::Producer,
    })
    .await
    .unwrap();

  let err = f
    .engine
    .get_risk_map(&ctx(), f.material_id, indicator, None)
    .await
    .unwrap_err();
  assert!(err.is_not_found());
  assert!(err.to_string().contains(&indicator.to_string()));
}

#[tokio::test]
async fn risk_map_names_missing_material_grid() {
  let f = fixture().await;
  let material = Uuid::new_v4();
  f.store
    .put_material(Material { id: material, name: "Rubber".into() })
    .await
    .unwrap();

  let err = f
    .engine
    .get_risk_map(&ctx(), material, f.indicator_id, None)
    .await
    .unwrap_err();
  assert!(err.is_not_found());
  assert!(err.to_string().contains(&material.to_string()));
}

#[tokio::test]
async fn risk_map_requires_conversion_factor() {
  let f = fixture().await;
  let indicator = f.store.get_indicator(f.indicator_id).await.unwrap().unwrap();
  let unit_id = indicator.unit_id.unwrap();
  f.store
    .put_unit_conversion(UnitConversion { unit_id, symbol: "ha".into(), factor: None })
    .await
    .unwrap();

  let err = f
    .engine
    .get_risk_map(&ctx(), f.material_id, f.indicator_id, None)
    .await
    .unwrap_err();
  assert!(err.is_not_found());
  assert!(err.to_string().contains("conversion factor"));
}

// ─── Cache ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cache_overwrites_and_clears() {
  let f = fixture().await;
  let cache = f.engine.cache();
  let key = serde_json::json!({ "region": f.region_id, "years": [2021, 2020] });
  let same_key = serde_json::json!({ "years": [2020, 2021], "region": f.region_id });

  cache
    .put(&key, landgrid_core::cache::CacheKind::RawMaterialValue, &1.0)
    .await
    .unwrap();
  cache
    .put(&same_key, landgrid_core::cache::CacheKind::RawMaterialValue, &2.0)
    .await
    .unwrap();

  let hit: Option<f64> = cache
    .get(&key, landgrid_core::cache::CacheKind::RawMaterialValue)
    .await
    .unwrap();
  assert_eq!(hit, Some(2.0));

  let other_kind: Option<f64> = cache
    .get(&key, landgrid_core::cache::CacheKind::RawIndicatorValue)
    .await
    .unwrap();
  assert_eq!(other_kind, None);

  assert_eq!(cache.clear().await.unwrap(), 1);
  let gone: Option<f64> = cache
    .get(&key, landgrid_core::cache::CacheKind::RawMaterialValue)
    .await
    .unwrap();
  assert_eq!(gone, None);
}
