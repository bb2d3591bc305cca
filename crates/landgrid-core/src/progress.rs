//! Progress reporting for long-running operations.
//!
//! Delivery is fire-and-forget: the engine never fails a computation because
//! a progress event could not be delivered.

use serde::Serialize;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
  pub task:    String,
  /// 0 to 100.
  pub percent: u8,
}

/// A channel to whoever is watching a long-running task (websocket, email,
/// log). Errors should be [`crate::Error::Unavailable`].
pub trait ProgressSink: Send + Sync + 'static {
  fn report(&self, event: &ProgressEvent) -> Result<()>;
}

/// Writes progress to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
  fn report(&self, event: &ProgressEvent) -> Result<()> {
    tracing::info!(task = %event.task, percent = event.percent, "progress");
    Ok(())
  }
}

/// Report through `sink`, logging and swallowing delivery failures.
pub fn notify(sink: &dyn ProgressSink, task: &str, percent: u8) {
  let event = ProgressEvent { task: task.to_owned(), percent: percent.min(100) };
  if let Err(e) = sink.report(&event) {
    tracing::warn!(task, error = %e, "progress delivery failed");
  }
}
