//! Sink error types.
//!
//! The transient/fatal split is the contract the loader's retry policy is
//! built on: transient errors are retried with backoff, fatal errors halt
//! the load step.

/// Errors produced by [`WarehouseSink`](crate::WarehouseSink) operations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Recoverable failure (busy/locked database, reset connection).
    /// Subject to the loader's bounded retry policy.
    #[error("transient sink error: {0}")]
    Transient(String),

    /// Non-retriable failure (bad identifier, schema mismatch, constraint
    /// violation, corrupt database).
    #[error("fatal sink error: {0}")]
    Fatal(String),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("warehouse lock poisoned")]
    LockPoisoned,
}

impl SinkError {
    /// Whether the loader may retry the operation.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a `SQLite` failure. Busy/locked are contention and worth
    /// retrying; everything else is treated as fatal.
    #[must_use]
    pub fn from_sqlite(err: &rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        if let rusqlite::Error::SqliteFailure(code, _) = err {
            if matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                return Self::Transient(err.to_string());
            }
        }
        Self::Fatal(err.to_string())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SinkError>;
