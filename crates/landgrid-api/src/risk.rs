//! `GET /risk-map?material_id=..&indicator_id=..[&year=..]`

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
  http::HeaderMap,
};
use landgrid_core::{
  engine::{ImpactEngine, MapResponse},
  store::ImpactStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::ApiError, params::context};

#[derive(Debug, Deserialize)]
pub struct RiskParams {
  pub material_id:  Uuid,
  pub indicator_id: Uuid,
  pub year:         Option<i32>,
}

pub async fn handler<S>(
  State(engine): State<Arc<ImpactEngine<S>>>,
  headers: HeaderMap,
  Query(params): Query<RiskParams>,
) -> Result<Json<MapResponse>, ApiError>
where
  S: ImpactStore,
{
  let ctx = context(&headers)?;
  let map = engine
    .get_risk_map(&ctx, params.material_id, params.indicator_id, params.year)
    .await?;
  Ok(Json(map))
}
