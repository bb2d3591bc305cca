//! Query orchestration.
//!
//! [`ImpactEngine`] wires the registry, resolver, aggregator, derived
//! aggregate and cache together over one store. The public operations live
//! in the submodules:
//!
//! | Operation | Module |
//! |-----------|--------|
//! | [`ImpactEngine::get_impact_table`] | `table` |
//! | [`ImpactEngine::get_impact_map`] | `map` |
//! | [`ImpactEngine::get_risk_map`] | `risk` |
//! | [`ImpactEngine::fork_scenario`] | `scenario` |

mod map;
mod risk;
mod scenario;
mod table;

use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use map::ImpactMapRequest;
pub use table::{
  GroupBy, ImpactTable, ImpactTableRequest, ImpactTableRow, IndicatorTable, YearSum,
  YearValue,
};

use crate::{
  Error, Result,
  aggregate::Aggregator,
  cache::{CacheKind, ContentCache},
  cell::CellId,
  derived::{AggregateMaintainer, AggregateState},
  grid::{DatasetOwner, GridKind, GridPointer},
  progress::{self, ProgressSink, TracingProgress},
  reference::Indicator,
  region::RegionResolver,
  registry::{GridRegistry, YearFallback},
  sourcing::{ActiveYears, InterventionType, SourcingLocation},
  store::{ImpactStore, LocationFilter},
};

/// Tunables that are not part of any single request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
  /// Resolution of the production grids and the derived aggregate.
  pub resolution:  u8,
  /// Yearly growth, in percent, applied to project years without data.
  pub growth_rate: f64,
}

impl Default for EngineSettings {
  fn default() -> Self { Self { resolution: 6, growth_rate: 1.5 } }
}

/// Who is asking. Passed explicitly to every operation and recorded on its
/// tracing span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
  pub request_id: Uuid,
  pub user_id:    Option<Uuid>,
}

impl RequestContext {
  pub fn new(user_id: Option<Uuid>) -> Self {
    Self { request_id: Uuid::new_v4(), user_id }
  }
}

/// The value returned by the map operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapResponse {
  pub data:     Vec<CellValue>,
  pub metadata: MapMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellValue {
  #[serde(rename = "h")]
  pub cell:  CellId,
  #[serde(rename = "v")]
  pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMetadata {
  /// Legend breakpoints, see [`crate::aggregate::quantiles`].
  pub quantiles:      [f64; 7],
  pub unit:           Option<String>,
  pub indicator_year: Option<i32>,
  pub material_year:  Option<i32>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct ImpactEngine<S> {
  store:      Arc<S>,
  aggregator: Arc<Aggregator>,
  cache:      ContentCache<S>,
  registry:   GridRegistry<S>,
  resolver:   RegionResolver<S>,
  maintainer: AggregateMaintainer<S>,
  progress:   Arc<dyn ProgressSink>,
  settings:   EngineSettings,
}

impl<S> Clone for ImpactEngine<S> {
  fn clone(&self) -> Self {
    Self {
      store:      self.store.clone(),
      aggregator: self.aggregator.clone(),
      cache:      self.cache.clone(),
      registry:   self.registry.clone(),
      resolver:   self.resolver.clone(),
      maintainer: self.maintainer.clone(),
      progress:   self.progress.clone(),
      settings:   self.settings,
    }
  }
}

impl<S: ImpactStore> ImpactEngine<S> {
  pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
    Self {
      aggregator: Arc::new(Aggregator::new()),
      cache: ContentCache::new(store.clone()),
      registry: GridRegistry::new(store.clone()),
      resolver: RegionResolver::new(store.clone()),
      maintainer: AggregateMaintainer::new(store.clone()),
      progress: Arc::new(TracingProgress),
      settings,
      store,
    }
  }

  /// Replace the default log-only progress sink.
  pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
    self.progress = sink;
    self
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn aggregator(&self) -> &Aggregator { &self.aggregator }

  pub fn cache(&self) -> &ContentCache<S> { &self.cache }

  pub fn registry(&self) -> &GridRegistry<S> { &self.registry }

  pub fn resolver(&self) -> &RegionResolver<S> { &self.resolver }

  pub fn maintainer(&self) -> &AggregateMaintainer<S> { &self.maintainer }

  pub fn settings(&self) -> &EngineSettings { &self.settings }

  // ─── Operator actions ────────────────────────────────────────────────

  /// Rebuild the derived aggregate now.
  #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
  pub async fn refresh_aggregate(&self, ctx: &RequestContext) -> Result<AggregateState> {
    progress::notify(self.progress.as_ref(), "aggregate-refresh", 0);
    let state = self.maintainer.refresh().await?;
    progress::notify(self.progress.as_ref(), "aggregate-refresh", 100);
    Ok(state)
  }

  /// Drop every cached rollup.
  #[tracing::instrument(skip_all, fields(request_id = %ctx.request_id))]
  pub async fn clear_cache(&self, ctx: &RequestContext) -> Result<usize> {
    self.cache.clear().await
  }

  // ─── Shared lookups ──────────────────────────────────────────────────

  /// Every indicator, and every material in `material_ids`, needs grid data
  /// before anything is computed. Returns the indicators in request order.
  async fn check_bindings(
    &self,
    indicator_ids: &[Uuid],
    material_ids: &[Uuid],
  ) -> Result<Vec<Indicator>> {
    let mut indicators = Vec::with_capacity(indicator_ids.len());
    for &id in indicator_ids {
      indicators.push(self.indicator(id).await?);
      self
        .registry
        .resolve(DatasetOwner::Indicator(id), GridKind::Indicator, None, YearFallback::Exact)
        .await?;
    }
    for &id in material_ids {
      self
        .registry
        .resolve(DatasetOwner::Material(id), GridKind::Producer, None, YearFallback::Exact)
        .await?;
    }
    Ok(indicators)
  }

  async fn indicator(&self, id: Uuid) -> Result<Indicator> {
    self
      .store
      .get_indicator(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("indicator {id}")))
  }

  /// Symbol of the indicator's unit, if it has one.
  async fn unit_symbol(&self, indicator: &Indicator) -> Result<Option<String>> {
    let Some(unit_id) = indicator.unit_id else {
      return Ok(None);
    };
    Ok(
      self
        .store
        .get_unit_conversion(unit_id)
        .await
        .map_err(Error::store)?
        .map(|c| c.symbol),
    )
  }

  /// Resolve a grid for `year`, falling back to the nearest earlier year and
  /// then to the earliest year on record.
  async fn pointer_for_year(
    &self,
    owner: DatasetOwner,
    kind: GridKind,
    year: i32,
  ) -> Result<GridPointer> {
    match self
      .registry
      .resolve(owner, kind, Some(year), YearFallback::NearestEarlier)
      .await
    {
      Err(e) if e.is_not_found() => {
        let years = self.registry.available_years(owner, kind).await?;
        let Some(&earliest) = years.first() else {
          return Err(e);
        };
        self
          .registry
          .resolve(owner, kind, Some(earliest), YearFallback::Exact)
          .await
      }
      other => other,
    }
  }

  /// Locations visible under `filter`.
  ///
  /// Without a scenario this is the baseline. With one it is every baseline
  /// row plus the scenario's replacing rows; a forked baseline row only
  /// counts in the years its fork does not cover.
  async fn select_locations(&self, filter: &LocationFilter) -> Result<Vec<Visible>> {
    let rows = self
      .store
      .find_sourcing_locations(filter)
      .await
      .map_err(Error::store)?;

    let Some(scenario_id) = filter.scenario_id else {
      return Ok(
        rows
          .into_iter()
          .filter(SourcingLocation::is_baseline)
          .map(|location| Visible { location, replaced: None })
          .collect(),
      );
    };

    let forked = self
      .store
      .forked_locations(scenario_id)
      .await
      .map_err(Error::store)?;

    Ok(
      rows
        .into_iter()
        .filter_map(|location| {
          if location.is_baseline() {
            let replaced = forked.get(&location.id).copied();
            Some(Visible { location, replaced })
          } else if location.scenario_id == Some(scenario_id)
            && location.intervention_type == InterventionType::Replacing
          {
            Some(Visible { location, replaced: None })
          } else {
            None
          }
        })
        .collect(),
    )
  }

  /// Total production of `producer` over `region_id`, through the
  /// raw-material-value cache.
  async fn production_sum(&self, region_id: Uuid, producer: &GridPointer) -> Result<f64> {
    let key = RawMaterialKey { region_id, dataset_id: producer.id };
    if let Some(v) = self.cache.get(&key, CacheKind::RawMaterialValue).await? {
      return Ok(v);
    }
    let cells = self.resolver.uncompact(region_id, producer.resolution).await?;
    let grid = self
      .store
      .grid_values(producer, Some(&cells))
      .await
      .map_err(Error::store)?;
    let sum = self.aggregator.sum(&cells, &grid.values);
    self.cache.put(&key, CacheKind::RawMaterialValue, &sum).await?;
    Ok(sum)
  }

  /// Production-weighted indicator total over `region_id`, through the
  /// raw-indicator-value cache.
  async fn weighted_indicator_sum(
    &self,
    region_id: Uuid,
    indicator: &GridPointer,
    producer: &GridPointer,
  ) -> Result<f64> {
    check_same_resolution(indicator, producer)?;
    let key = RawIndicatorKey {
      region_id,
      indicator_dataset_id: indicator.id,
      material_dataset_id: producer.id,
    };
    if let Some(v) = self.cache.get(&key, CacheKind::RawIndicatorValue).await? {
      return Ok(v);
    }
    let cells = self.resolver.uncompact(region_id, producer.resolution).await?;
    let values = self
      .store
      .grid_values(indicator, Some(&cells))
      .await
      .map_err(Error::store)?;
    let weights = self
      .store
      .grid_values(producer, Some(&cells))
      .await
      .map_err(Error::store)?;
    let sum = self
      .aggregator
      .weighted_sum(&cells, &values.values, &weights.values);
    self.cache.put(&key, CacheKind::RawIndicatorValue, &sum).await?;
    Ok(sum)
  }
}

/// A location in the current view.
#[derive(Debug, Clone)]
struct Visible {
  location: SourcingLocation,
  /// Years a scenario fork stands in for this baseline row.
  replaced: Option<ActiveYears>,
}

impl Visible {
  fn counts_in(&self, year: i32) -> bool {
    self.location.active_years.contains(year)
      && !self.replaced.is_some_and(|years| years.contains(year))
  }
}

#[derive(Serialize)]
struct RawMaterialKey {
  region_id:  Uuid,
  dataset_id: Uuid,
}

#[derive(Serialize)]
struct RawIndicatorKey {
  region_id:            Uuid,
  indicator_dataset_id: Uuid,
  material_dataset_id:  Uuid,
}

fn check_same_resolution(a: &GridPointer, b: &GridPointer) -> Result<()> {
  if a.resolution != b.resolution {
    return Err(Error::InvalidArgument(format!(
      "resolution mismatch: {a} is at {} but {b} is at {}",
      a.resolution, b.resolution
    )));
  }
  Ok(())
}

/// Every distinct value, in order.
fn distinct<T: Ord + Copy>(items: impl IntoIterator<Item = T>) -> Vec<T> {
  items.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
