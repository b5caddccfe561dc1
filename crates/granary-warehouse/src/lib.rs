//! Warehouse persistence for the granary pipeline.
//!
//! Provides the [`WarehouseSink`] trait (the loader's storage contract)
//! and a [`SqliteWarehouse`] implementation used as the embedded target
//! warehouse.

#![warn(clippy::pedantic)]

pub mod error;
pub mod sink;
pub mod sqlite;

pub use error::SinkError;
pub use sink::WarehouseSink;
pub use sqlite::SqliteWarehouse;
