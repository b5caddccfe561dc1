//! Pipeline error model and retry backoff helper.
//!
//! Run-level faults only. Row-level problems (validation rejections,
//! enrichment failures) are data, not errors, and never appear here;
//! transient sink failures live inside the loader's retry loop.

use std::time::Duration;

/// Backoff delays are capped so a misconfigured base cannot stall a run
/// for minutes per attempt.
const BACKOFF_MAX_MS: u64 = 60_000;

/// Categorized run-level pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source file/endpoint cannot be reached. Fatal, halts the run.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source payload cannot be parsed as the declared format.
    /// Fatal, halts the run.
    #[error("source format error: {0}")]
    SourceFormat(String),

    /// The configured rule set is unusable (e.g. dedup key names an
    /// undeclared column). Fatal, halts the run.
    #[error("rule configuration error: {0}")]
    RuleConfig(String),

    /// Non-retriable loader failure (schema mismatch, auth, corrupt
    /// target). Halts loading and fails the run.
    #[error("load failed: {0}")]
    LoadFatal(String),

    /// The run was cancelled externally.
    #[error("run cancelled")]
    Cancelled,

    /// Host-side failure (task panic, runtime error).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

/// Compute the delay before retry number `attempt` (1-based): exponential
/// doubling from `base_ms`, capped at 60 s.
#[must_use]
pub fn compute_backoff(base_ms: u64, attempt: u32) -> Duration {
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}
