//! Typed model of the pipeline YAML.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use granary_types::schema::TableSchema;

/// Top-level pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, used in logs and the run report.
    pub pipeline: String,
    pub source: SourceConfig,
    /// Declared shape of a clean record. Column names are stored
    /// uppercase; incoming headers are folded to match.
    pub schema: TableSchema,
    #[serde(default)]
    pub rules: RuleConfig,
    /// Derivations applied in order to every clean record.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub enrich: Vec<Derivation>,
    pub load: LoadConfig,
    /// Fraction of read rows that may be rejected before the whole run
    /// is failed. 1.0 disables the guard.
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: f64,
}

/// Where raw records come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A CSV file with a header row, or a directory of them.
    Csv { path: String },
    /// A JSON file holding an array of objects, or a directory of them.
    Json { path: String },
    /// A paginated HTTP endpoint returning JSON arrays.
    Api {
        url: String,
        #[serde(default = "default_page_size")]
        page_size: u32,
        #[serde(default = "default_source_timeout_secs")]
        timeout_secs: u64,
    },
}

impl SourceConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Csv { .. } => "csv",
            SourceConfig::Json { .. } => "json",
            SourceConfig::Api { .. } => "api",
        }
    }
}

/// Validation settings beyond what the schema itself declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Columns whose combined values identify a record. Empty means the
    /// entire row is the identity.
    #[serde(default)]
    pub dedup_key: Vec<String>,
}

/// A single derived-column rule. New columns may overwrite base columns
/// of the same name; later derivations see earlier outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Derivation {
    /// Trim and uppercase a text column, optionally remapping the
    /// result through a lookup table.
    NormalizeCategory {
        column: String,
        into: String,
        #[serde(default)]
        map: BTreeMap<String, String>,
    },
    /// Multiply two numeric columns into a float column.
    LineTotal {
        quantity: String,
        unit_price: String,
        into: String,
    },
    /// Percentage of non-null declared columns, rounded to 2 decimals.
    QualityScore { into: String },
}

impl Derivation {
    /// Name of the column this derivation produces.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Derivation::NormalizeCategory { into, .. }
            | Derivation::LineTotal { into, .. }
            | Derivation::QualityScore { into } => into,
        }
    }
}

/// Warehouse-loading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Target table name.
    pub table: String,
    /// Path of the SQLite warehouse file. `:memory:` is accepted.
    pub warehouse_path: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retries per batch after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Per-batch write deadline; an expired deadline counts as a
    /// transient failure.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Truncate the target table before loading, making reruns
    /// idempotent.
    #[serde(default)]
    pub truncate_before_load: bool,
    /// Treat an exhausted batch as fatal instead of skipping it.
    #[serde(default)]
    pub fail_on_batch_error: bool,
}

fn default_rejection_threshold() -> f64 {
    1.0
}

fn default_page_size() -> u32 {
    100
}

fn default_source_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    500
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_write_timeout_secs() -> u64 {
    30
}
