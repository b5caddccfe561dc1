//! Warehouse sink trait definition.
//!
//! [`WarehouseSink`] is the loader's storage contract: table lifecycle,
//! bulk writes, and the row counts the post-load reconciliation relies on.

use granary_types::record::Columns;
use granary_types::{EnrichedRecord, TableSchema};

use crate::error;

/// Storage contract for the target warehouse table.
///
/// Implementations must be `Send + Sync`; the loader owns the sink behind
/// `Arc<dyn WarehouseSink>` for the duration of one run and releases it on
/// every exit path.
pub trait WarehouseSink: Send + Sync {
    /// Create the target table from the declared schema if it does not
    /// exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::SinkError) on storage failure.
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> error::Result<()>;

    /// Delete all rows from the target table (truncate-before-load).
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::SinkError) on storage failure.
    fn truncate(&self, table: &str) -> error::Result<()>;

    /// Bulk-write one batch atomically. Returns the number of rows the
    /// warehouse reports written, which reconciliation compares against
    /// the batch size.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Transient`](crate::SinkError::Transient) for
    /// retriable failures and other variants for fatal ones.
    fn write_batch(&self, table: &str, records: &[EnrichedRecord]) -> error::Result<u64>;

    /// Current row count of the target table.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::SinkError) on storage failure.
    fn row_count(&self, table: &str) -> error::Result<u64>;

    /// Read back every row's declared columns, in insertion order.
    /// Used by reconciliation checks and round-trip tests.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::SinkError) on storage failure.
    fn fetch_all(&self, table: &str, schema: &TableSchema) -> error::Result<Vec<Columns>>;
}
