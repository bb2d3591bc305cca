//! JSON REST API for Landgrid.
//!
//! Exposes an axum [`Router`] backed by an [`ImpactEngine`] over any
//! [`landgrid_core::store::ImpactStore`]. Auth, TLS, and transport concerns
//! are the caller's responsibility; the caller's identity arrives in the
//! `x-user-id` header.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", landgrid_api::api_router(engine.clone()))
//! ```

pub mod admin;
pub mod error;
pub mod impact;
pub mod params;
pub mod risk;
pub mod scenarios;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use landgrid_core::{engine::ImpactEngine, store::ImpactStore};

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(engine: Arc<ImpactEngine<S>>) -> Router<()>
where
  S: ImpactStore,
{
  Router::new()
    // Queries
    .route("/impact/table", get(impact::table::<S>))
    .route("/impact/map", get(impact::map::<S>))
    .route("/risk-map", get(risk::handler::<S>))
    // Scenarios
    .route(
      "/scenarios/{id}/interventions",
      post(scenarios::add_intervention::<S>),
    )
    // Operator
    .route("/admin/aggregate/refresh", post(admin::refresh_aggregate::<S>))
    .route("/admin/cache/clear", post(admin::clear_cache::<S>))
    .with_state(engine)
}
