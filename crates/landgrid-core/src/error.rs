//! Error types for `landgrid-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A grid binding, entity, or unit conversion does not exist. The message
  /// always names the offending entity.
  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// A collaborator (store, notification channel) could not be reached.
  #[error("unavailable: {0}")]
  Unavailable(String),

  /// Several per-row validation failures, reported together.
  #[error("validation failed: {}", .0.join("; "))]
  ValidationAggregate(Vec<String>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("task failed: {0}")]
  Task(String),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
