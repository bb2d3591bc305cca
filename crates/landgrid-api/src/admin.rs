//! Operator actions.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/admin/aggregate/refresh` | Rebuilds the derived aggregate |
//! | `POST` | `/admin/cache/clear` | Drops every cached result |

use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap};
use landgrid_core::{derived::AggregateState, engine::ImpactEngine, store::ImpactStore};
use serde::Serialize;

use crate::{error::ApiError, params::context};

#[derive(Debug, Serialize)]
pub struct Refreshed {
  pub state: AggregateState,
}

pub async fn refresh_aggregate<S>(
  State(engine): State<Arc<ImpactEngine<S>>>,
  headers: HeaderMap,
) -> Result<Json<Refreshed>, ApiError>
where
  S: ImpactStore,
{
  let ctx = context(&headers)?;
  let state = engine.refresh_aggregate(&ctx).await?;
  Ok(Json(Refreshed { state }))
}

#[derive(Debug, Serialize)]
pub struct Cleared {
  pub removed: usize,
}

pub async fn clear_cache<S>(
  State(engine): State<Arc<ImpactEngine<S>>>,
  headers: HeaderMap,
) -> Result<Json<Cleared>, ApiError>
where
  S: ImpactStore,
{
  let ctx = context(&headers)?;
  let removed = engine.clear_cache(&ctx).await?;
  Ok(Json(Cleared { removed }))
}
