//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// Every problem found while validating a request body.
  #[error("validation failed: {}", .0.join("; "))]
  Validation(Vec<String>),

  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<landgrid_core::Error> for ApiError {
  fn from(err: landgrid_core::Error) -> Self {
    use landgrid_core::Error as E;
    match err {
      E::NotFound(m) => Self::NotFound(m),
      E::InvalidArgument(m) => Self::BadRequest(m),
      E::ValidationAggregate(problems) => Self::Validation(problems),
      E::Unavailable(m) => Self::Unavailable(m),
      other => Self::Internal(other.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, json!({ "error": m })),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
      ApiError::Validation(problems) => (
        StatusCode::BAD_REQUEST,
        json!({ "error": self.to_string(), "details": problems }),
      ),
      ApiError::Unavailable(m) => {
        (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": m }))
      }
      ApiError::Internal(m) => {
        tracing::error!(error = %m, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": m }))
      }
    };
    (status, Json(body)).into_response()
  }
}
