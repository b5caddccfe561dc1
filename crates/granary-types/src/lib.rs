//! Shared data model for the granary ETL pipeline.
//!
//! Pure types only: records as they move through the pipeline, the declared
//! table schema, and the run report. Kept free of I/O so the engine,
//! warehouse, and CLI crates can share them without circular dependencies.

pub mod record;
pub mod report;
pub mod schema;

pub use record::{CleanRecord, EnrichedRecord, RawRecord, RejectReason, Rejection, Value};
pub use report::{Reconciliation, RunReport, RunStage, RunStatus};
pub use schema::{ColumnSpec, ColumnType, TableSchema};
