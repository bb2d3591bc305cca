//! The risk map: an indicator grid crossed with a material grid.

use serde::Serialize;
use uuid::Uuid;

use super::{CellValue, ImpactEngine, MapMetadata, MapResponse, RequestContext, check_same_resolution};
use crate::{
  Error, Result,
  aggregate::quantiles,
  cache::CacheKind,
  grid::{DatasetOwner, GridKind},
  registry::YearFallback,
  store::ImpactStore,
};

#[derive(Serialize)]
struct RiskMapKey {
  material_id:          Uuid,
  indicator_id:         Uuid,
  year:                 Option<i32>,
  indicator_dataset_id: Uuid,
  material_dataset_id:  Uuid,
}

impl<S: ImpactStore> ImpactEngine<S> {
  /// `indicator(c) * material(c) * unit factor` for every cell covered by
  /// both grids.
  ///
  /// The material grid is the one the indicator is defined against
  /// (production or harvest area). Missing grids, units or conversion
  /// factors are [`Error::NotFound`] naming the entity.
  #[tracing::instrument(
    skip_all,
    fields(
      request_id = %ctx.request_id,
      material_id = %material_id,
      indicator_id = %indicator_id
    )
  )]
  pub async fn get_risk_map(
    &self,
    ctx: &RequestContext,
    material_id: Uuid,
    indicator_id: Uuid,
    year: Option<i32>,
  ) -> Result<MapResponse> {
    let indicator = self.indicator(indicator_id).await?;
    self
      .store
      .get_material(material_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(format!("material {material_id}")))?;

    let indicator_grid = self
      .registry
      .resolve(
        DatasetOwner::Indicator(indicator_id),
        GridKind::Indicator,
        year,
        YearFallback::NearestEarlier,
      )
      .await?;
    let material_grid = self
      .registry
      .resolve(
        DatasetOwner::Material(material_id),
        indicator.material_basis.grid_kind(),
        year,
        YearFallback::NearestEarlier,
      )
      .await?;
    check_same_resolution(&indicator_grid, &material_grid)?;

    let unit_id = indicator.unit_id.ok_or_else(|| {
      Error::NotFound(format!("unit for indicator {indicator_id}"))
    })?;
    let conversion = self
      .store
      .get_unit_conversion(unit_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| {
        Error::NotFound(format!(
          "unit conversion {unit_id} for indicator {indicator_id}"
        ))
      })?;
    let factor = conversion.factor.ok_or_else(|| {
      Error::NotFound(format!(
        "conversion factor for unit {} of indicator {indicator_id}",
        conversion.symbol
      ))
    })?;

    let key = RiskMapKey {
      material_id,
      indicator_id,
      year,
      indicator_dataset_id: indicator_grid.id,
      material_dataset_id: material_grid.id,
    };
    if let Some(map) = self.cache.get(&key, CacheKind::RiskMap).await? {
      return Ok(map);
    }

    let indicator_values = self
      .store
      .grid_values(&indicator_grid, None)
      .await
      .map_err(Error::store)?;
    let material_values = self
      .store
      .grid_values(&material_grid, None)
      .await
      .map_err(Error::store)?;
    let product =
      self
        .aggregator
        .cellwise_product(&indicator_values, &material_values, factor)?;

    let map = MapResponse {
      metadata: MapMetadata {
        quantiles:      quantiles(product.values().copied()),
        unit:           Some(conversion.symbol),
        indicator_year: indicator_grid.year,
        material_year:  material_grid.year,
      },
      data:     product
        .into_iter()
        .map(|(cell, value)| CellValue { cell, value })
        .collect(),
    };
    tracing::info!(cells = map.data.len(), "risk map computed");

    self.cache.put(&key, CacheKind::RiskMap, &map).await?;
    Ok(map)
  }
}
