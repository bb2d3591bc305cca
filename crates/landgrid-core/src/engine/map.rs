//! The impact map: indicator records spread over production cells.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CellValue, ImpactEngine, MapMetadata, MapResponse, RequestContext, distinct};
use crate::{
  Error, Result,
  aggregate::quantiles,
  cache::CacheKind,
  cell::CellId,
  grid::{DatasetOwner, GridKind, GridValues},
  registry::YearFallback,
  sourcing::SourcingLocation,
  store::{ImpactStore, LocationFilter},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactMapRequest {
  pub indicator_ids: Vec<Uuid>,
  pub year:          i32,
  /// Output resolution; no finer than the aggregate.
  pub resolution:    u8,
  #[serde(flatten)]
  pub filter:        LocationFilter,
}

impl<S: ImpactStore> ImpactEngine<S> {
  /// Impact of the selected locations in one year, distributed over the
  /// cells of their regions in proportion to production and rolled up to
  /// the requested resolution.
  #[tracing::instrument(
    skip_all,
    fields(request_id = %ctx.request_id, user_id = ?ctx.user_id)
  )]
  pub async fn get_impact_map(
    &self,
    ctx: &RequestContext,
    request: &ImpactMapRequest,
  ) -> Result<MapResponse> {
    if request.indicator_ids.is_empty() {
      return Err(Error::InvalidArgument("at least one indicator is required".into()));
    }
    if request.resolution > self.settings.resolution {
      return Err(Error::InvalidArgument(format!(
        "resolution {} is finer than the aggregate resolution {}",
        request.resolution, self.settings.resolution
      )));
    }
    let indicators = self
      .check_bindings(&request.indicator_ids, &request.filter.material_ids)
      .await?;

    if let Some(map) = self.cache.get(request, CacheKind::ImpactMap).await? {
      return Ok(map);
    }

    self.maintainer.ensure_fresh().await?;

    let locations: Vec<SourcingLocation> = self
      .select_locations(&request.filter)
      .await?
      .into_iter()
      .filter(|v| v.counts_in(request.year))
      .map(|v| v.location)
      .collect();
    let impact = self.location_impacts(&locations, request).await?;

    // (region, dataset) production weights for every location with impact.
    let mut dataset_of: HashMap<Uuid, Uuid> = HashMap::new();
    let mut keys = Vec::new();
    for loc in locations.iter().filter(|l| impact.contains_key(&l.id)) {
      let dataset_id = match dataset_of.get(&loc.material_id) {
        Some(id) => *id,
        None => {
          let pointer = self
            .registry
            .resolve(
              DatasetOwner::Material(loc.material_id),
              GridKind::Producer,
              None,
              YearFallback::NearestEarlier,
            )
            .await?;
          dataset_of.insert(loc.material_id, pointer.id);
          pointer.id
        }
      };
      keys.push((loc.region_id, dataset_id));
    }
    let keys = distinct(keys);
    let weights = self.production_weights(&keys).await?;

    let mut cells: BTreeMap<CellId, f64> = BTreeMap::new();
    for loc in &locations {
      let Some(&total) = impact.get(&loc.id) else {
        continue;
      };
      let Some(grid) = dataset_of
        .get(&loc.material_id)
        .and_then(|d| weights.get(&(loc.region_id, *d)))
      else {
        continue;
      };
      let production: f64 = grid.values().sum();
      if production == 0.0 {
        continue;
      }
      for (cell, value) in grid {
        let target = if cell.resolution() > request.resolution {
          cell.parent(request.resolution)?
        } else {
          *cell
        };
        *cells.entry(target).or_default() += total * value / production;
      }
    }

    // Only a unit shared by every indicator describes their sum.
    let mut units = Vec::with_capacity(indicators.len());
    for indicator in &indicators {
      units.push(self.unit_symbol(indicator).await?);
    }
    let unit = match units.split_first() {
      Some((first, rest)) if rest.iter().all(|u| u == first) => first.clone(),
      _ => None,
    };

    let map = MapResponse {
      metadata: MapMetadata {
        quantiles:      quantiles(cells.values().copied()),
        unit,
        indicator_year: Some(request.year),
        material_year:  None,
      },
      data:     cells
        .into_iter()
        .map(|(cell, value)| CellValue { cell, value })
        .collect(),
    };
    tracing::info!(cells = map.data.len(), "impact map computed");

    self.cache.put(request, CacheKind::ImpactMap, &map).await?;
    Ok(map)
  }

  /// Summed indicator records per location for the request year, scaled by
  /// each location's coefficients. Locations without records are absent.
  async fn location_impacts(
    &self,
    locations: &[SourcingLocation],
    request: &ImpactMapRequest,
  ) -> Result<HashMap<Uuid, f64>> {
    let owners = distinct(locations.iter().map(SourcingLocation::records_owner));
    let records = self
      .store
      .sourcing_records_for(&owners, request.year, request.year)
      .await
      .map_err(Error::store)?;
    let record_ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
    let values = self
      .store
      .indicator_records_for(&record_ids, &request.indicator_ids)
      .await
      .map_err(Error::store)?;

    let mut per_record: HashMap<Uuid, Vec<(Uuid, f64)>> = HashMap::new();
    for v in values {
      per_record
        .entry(v.sourcing_record_id)
        .or_default()
        .push((v.indicator_id, v.value));
    }
    let mut per_owner: HashMap<Uuid, Vec<(Uuid, f64)>> = HashMap::new();
    for r in &records {
      if let Some(values) = per_record.get(&r.id) {
        per_owner
          .entry(r.sourcing_location_id)
          .or_default()
          .extend(values.iter().copied());
      }
    }

    Ok(
      locations
        .iter()
        .filter_map(|l| {
          let values = per_owner.get(&l.records_owner())?;
          let total: f64 = values
            .iter()
            .map(|(indicator_id, v)| v * l.coefficient(*indicator_id))
            .sum();
          Some((l.id, total))
        })
        .collect(),
    )
  }

  /// Production cells per `(region, dataset)`, read from the derived
  /// aggregate. Pairs the aggregate does not cover are computed directly.
  async fn production_weights(
    &self,
    keys: &[(Uuid, Uuid)],
  ) -> Result<HashMap<(Uuid, Uuid), GridValues>> {
    let mut weights: HashMap<(Uuid, Uuid), GridValues> = HashMap::new();
    for row in self
      .store
      .aggregate_rows(keys)
      .await
      .map_err(Error::store)?
    {
      weights
        .entry((row.region_id, row.dataset_id))
        .or_default()
        .insert(row.cell, row.value);
    }

    for &(region_id, dataset_id) in keys {
      if weights.contains_key(&(region_id, dataset_id)) {
        continue;
      }
      let pointer = self
        .store
        .get_grid_pointer(dataset_id)
        .await
        .map_err(Error::store)?
        .ok_or_else(|| Error::NotFound(format!("grid dataset {dataset_id}")))?;
      tracing::debug!(%region_id, dataset = %pointer, "region not in derived aggregate");
      let cells = self.resolver.uncompact(region_id, pointer.resolution).await?;
      let data = self
        .store
        .grid_values(&pointer, Some(&cells))
        .await
        .map_err(Error::store)?;
      weights.insert((region_id, dataset_id), data.values);
    }
    Ok(weights)
  }
}
