//! `POST /scenarios/{id}/interventions`
//!
//! Body: an [`InterventionSpec`], e.g.
//!
//! ```json
//! {
//!   "title": "Switch cotton supplier",
//!   "start_year": 2024,
//!   "filter": { "material_ids": ["..."] },
//!   "action": { "type": "cancel" }
//! }
//! ```
//!
//! Responds `201` with the ids of the created scenario rows, or `400` with
//! every validation problem under `"details"`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use landgrid_core::{engine::ImpactEngine, scenario::InterventionSpec, store::ImpactStore};
use serde::Serialize;
use uuid::Uuid;

use crate::{error::ApiError, params::context};

#[derive(Debug, Serialize)]
pub struct Forked {
  pub scenario_id:  Uuid,
  pub location_ids: Vec<Uuid>,
}

pub async fn add_intervention<S>(
  State(engine): State<Arc<ImpactEngine<S>>>,
  Path(scenario_id): Path<Uuid>,
  headers: HeaderMap,
  Json(spec): Json<InterventionSpec>,
) -> Result<impl IntoResponse, ApiError>
where
  S: ImpactStore,
{
  let ctx = context(&headers)?;
  let location_ids = engine.fork_scenario(&ctx, scenario_id, &spec).await?;
  Ok((StatusCode::CREATED, Json(Forked { scenario_id, location_ids })))
}
