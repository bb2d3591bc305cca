//! Core types and engine for Landgrid, the geospatial impact aggregation and
//! caching engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement [`store::ImpactStore`]; everything else in here is
//! either pure computation over hex-grid cell sets or orchestration on top of
//! that trait.

pub mod aggregate;
pub mod cache;
pub mod cell;
pub mod derived;
pub mod engine;
pub mod error;
pub mod grid;
pub mod progress;
pub mod reference;
pub mod region;
pub mod registry;
pub mod scenario;
pub mod sourcing;
pub mod store;

pub use error::{Error, Result};

