//! Handlers for `/impact` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/impact/table` | `?indicator_ids=..&start_year=..&end_year=..&group_by=material` |
//! | `GET`  | `/impact/map` | `?indicator_ids=..&year=..&resolution=..` |
//!
//! Both accept the location filter fields of [`FilterParams`].

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
  http::HeaderMap,
};
use landgrid_core::{
  engine::{
    GroupBy, ImpactEngine, ImpactMapRequest, ImpactTable, ImpactTableRequest,
    MapResponse,
  },
  store::ImpactStore,
};
use serde::Deserialize;

use crate::{
  error::ApiError,
  params::{FilterParams, context, id_list},
};

// ─── Table ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TableParams {
  pub indicator_ids: String,
  pub start_year:    i32,
  pub end_year:      i32,
  #[serde(default = "default_group_by")]
  pub group_by:      GroupBy,
}

fn default_group_by() -> GroupBy { GroupBy::Material }

/// `GET /impact/table`
pub async fn table<S>(
  State(engine): State<Arc<ImpactEngine<S>>>,
  headers: HeaderMap,
  Query(params): Query<TableParams>,
  Query(filter): Query<FilterParams>,
) -> Result<Json<ImpactTable>, ApiError>
where
  S: ImpactStore,
{
  let ctx = context(&headers)?;
  let request = ImpactTableRequest {
    indicator_ids: id_list("indicator_ids", Some(&params.indicator_ids))?,
    start_year:    params.start_year,
    end_year:      params.end_year,
    group_by:      params.group_by,
    filter:        filter.into_filter()?,
  };
  Ok(Json(engine.get_impact_table(&ctx, &request).await?))
}

// ─── Map ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MapParams {
  pub indicator_ids: String,
  pub year:          i32,
  pub resolution:    u8,
}

/// `GET /impact/map`
pub async fn map<S>(
  State(engine): State<Arc<ImpactEngine<S>>>,
  headers: HeaderMap,
  Query(params): Query<MapParams>,
  Query(filter): Query<FilterParams>,
) -> Result<Json<MapResponse>, ApiError>
where
  S: ImpactStore,
{
  let ctx = context(&headers)?;
  let request = ImpactMapRequest {
    indicator_ids: id_list("indicator_ids", Some(&params.indicator_ids))?,
    year:          params.year,
    resolution:    params.resolution,
    filter:        filter.into_filter()?,
  };
  Ok(Json(engine.get_impact_map(&ctx, &request).await?))
}
