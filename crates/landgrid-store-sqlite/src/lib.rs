//! SQLite backend for the Landgrid impact store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Grid datasets live in their own
//! tables, one value column per dataset, keyed by the 64-bit cell index.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
