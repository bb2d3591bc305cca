//! Error type for `landgrid-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] landgrid_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum or cell column holds a value this version cannot read.
  #[error("unrecognised stored value: {0}")]
  Decode(String),

  /// Grid tables and columns are interpolated into SQL and must be plain
  /// identifiers.
  #[error("invalid identifier: {0:?}")]
  InvalidIdentifier(String),

  #[error("grid pointer not found: {0}")]
  GridPointerNotFound(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
