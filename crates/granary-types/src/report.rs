//! Run report and run lifecycle types.
//!
//! The [`RunReport`] is the single source of truth for a run's outcome and
//! the only artifact persisted beyond the warehouse write itself. It is
//! serializable for logging or a monitoring sink.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::RejectReason;

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Zero rejections, zero failed batches, clean reconciliation.
    Succeeded,
    /// All stages completed but some rows were rejected, some batches
    /// failed, or reconciliation found a mismatch.
    PartiallySucceeded,
    /// Fatal error, cancellation, or rejection threshold crossed.
    Failed,
}

impl RunStatus {
    /// Wire-format string for storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline run stage. Transitions are strictly forward; no stage re-entry
/// within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Initialized,
    Extracting,
    Transforming,
    Loading,
    Reconciling,
    Finished,
}

impl RunStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Reconciling => "reconciling",
            Self::Finished => "finished",
        }
    }

    /// Whether `next` is a legal forward transition from `self`.
    /// Any later stage is reachable (a fatal error may skip to `Finished`),
    /// but moving backward or re-entering the same stage is not.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        next > self
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-load row-count reconciliation, zero-tolerance.
///
/// `attempted` counts rows handed to the sink in batches that ultimately
/// succeeded; `confirmed` sums the sink's reported written-row counts;
/// `table_delta` is post-load minus pre-load table row count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub attempted: u64,
    pub confirmed: u64,
    pub table_delta: i64,
}

impl Reconciliation {
    /// Any mismatch is a reportable anomaly, never silently ignored.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.attempted == self.confirmed && i64::try_from(self.confirmed) == Ok(self.table_delta)
    }
}

/// Aggregate counts and terminal status for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub pipeline: String,
    /// ISO-8601 UTC timestamp of when the run started.
    #[serde(default)]
    pub started_at: String,
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub rejected_by_reason: BTreeMap<RejectReason, u64>,
    pub rows_loaded: u64,
    pub batches_failed: u64,
    pub retry_attempts: u64,
    pub reconciliation: Reconciliation,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl RunReport {
    /// Empty report for a run that has just started.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            started_at: String::new(),
            rows_read: 0,
            rows_rejected: 0,
            rejected_by_reason: BTreeMap::new(),
            rows_loaded: 0,
            batches_failed: 0,
            retry_attempts: 0,
            reconciliation: Reconciliation::default(),
            status: RunStatus::Failed,
            error: None,
            duration_secs: 0.0,
        }
    }

    /// Record one rejection tally.
    pub fn tally_rejection(&mut self, reason: RejectReason) {
        self.rows_rejected += 1;
        *self.rejected_by_reason.entry(reason).or_insert(0) += 1;
    }
}
