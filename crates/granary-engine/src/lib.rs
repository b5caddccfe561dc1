//! Core pipeline crate for granary batch runs.
//!
//! A run flows strictly Reader -> Validator -> Enricher -> Loader, driven
//! by the [`orchestrator`], which owns run-level error handling and the
//! final [`RunReport`](granary_types::RunReport).

pub mod cancel;
pub mod config;
pub mod enrich;
pub mod errors;
pub mod load;
pub mod orchestrator;
pub mod source;
pub mod validate;

pub use cancel::CancelToken;
pub use errors::PipelineError;
pub use orchestrator::{run_pipeline, run_pipeline_with_sink};
