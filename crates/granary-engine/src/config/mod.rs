//! Pipeline configuration: YAML model, parsing with environment
//! substitution, and semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_pipeline, parse_pipeline_str};
pub use types::{
    Derivation, LoadConfig, PipelineConfig, RuleConfig, SourceConfig,
};
pub use validator::validate_pipeline;
