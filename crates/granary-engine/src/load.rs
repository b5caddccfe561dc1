//! Warehouse loader: batching, bounded retry, reconciliation counts.
//!
//! Sink calls are blocking (SQLite behind a mutex), so every call runs
//! under `spawn_blocking`; batch writes additionally carry a deadline,
//! and an expired deadline is treated as a transient failure.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use granary_types::record::EnrichedRecord;
use granary_types::schema::TableSchema;
use granary_warehouse::{SinkError, WarehouseSink};

use crate::cancel::CancelToken;
use crate::config::LoadConfig;
use crate::errors::{compute_backoff, PipelineError};

/// Counters produced by one load step, consumed by the orchestrator's
/// report and reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Rows the sink confirmed written across succeeded batches.
    pub rows_loaded: u64,
    /// Batches dropped after retry exhaustion.
    pub batches_failed: u64,
    /// Total backoff sleeps taken across all batches.
    pub retry_attempts: u64,
    /// Rows handed to succeeded batch writes.
    pub attempted: u64,
    /// Rows the sink reported written for those batches.
    pub confirmed: u64,
    /// Post-load table row count minus the pre-load count.
    pub table_delta: i64,
    /// Set when cancellation stopped the loop before all batches ran.
    pub cancelled: bool,
    /// Set when a non-retriable failure halted loading partway; the
    /// counters above still cover the batches that committed first.
    pub fatal: Option<String>,
}

/// One bulk-write unit: an ordered run of enriched records owned by the
/// loader until its write is acknowledged or abandoned.
struct LoadBatch {
    index: usize,
    records: Arc<Vec<EnrichedRecord>>,
}

pub struct Loader {
    sink: Arc<dyn WarehouseSink>,
    config: LoadConfig,
    schema: TableSchema,
}

impl Loader {
    #[must_use]
    pub fn new(sink: Arc<dyn WarehouseSink>, config: LoadConfig, schema: TableSchema) -> Self {
        Self { sink, config, schema }
    }

    /// Load every record in batches of at most `batch_size`.
    ///
    /// Transient write failures are retried with exponential backoff up
    /// to `max_retries` times; an exhausted batch is counted and skipped
    /// unless `fail_on_batch_error` is set. The cancel token is observed
    /// between batches: the write in flight finishes, no new one starts.
    ///
    /// A non-retriable failure once batches have started writing does
    /// not discard the outcome: it stops the loop and is recorded in
    /// [`LoadOutcome::fatal`], so committed batches stay accounted for.
    ///
    /// # Errors
    ///
    /// [`PipelineError::LoadFatal`] on schema mismatch or a setup
    /// failure (table creation, truncate, row count) before any batch
    /// is written.
    pub async fn load(
        &self,
        records: Vec<EnrichedRecord>,
        cancel: &CancelToken,
    ) -> Result<LoadOutcome, PipelineError> {
        self.check_columns(&records)?;

        let table = self.config.table.clone();
        let schema = self.schema.clone();
        self.sink_call(move |sink| sink.ensure_table(&table, &schema))
            .await?
            .map_err(fatal)?;
        if self.config.truncate_before_load {
            let table = self.config.table.clone();
            self.sink_call(move |sink| sink.truncate(&table)).await?.map_err(fatal)?;
            info!(table = %self.config.table, "target table truncated before load");
        }

        let table = self.config.table.clone();
        let pre_count = self
            .sink_call(move |sink| sink.row_count(&table))
            .await?
            .map_err(fatal)?;

        let mut outcome = LoadOutcome::default();
        let batches: Vec<LoadBatch> = records
            .chunks(self.config.batch_size)
            .enumerate()
            .map(|(index, chunk)| LoadBatch {
                index,
                records: Arc::new(chunk.to_vec()),
            })
            .collect();
        let total_batches = batches.len();

        for batch in batches {
            if cancel.is_cancelled() {
                warn!(
                    batches_remaining = total_batches - batch.index,
                    "cancellation observed, stopping load"
                );
                outcome.cancelled = true;
                break;
            }
            self.write_with_retry(&batch, &mut outcome).await?;
            if outcome.fatal.is_some() {
                break;
            }
        }

        let table = self.config.table.clone();
        let post_count = self
            .sink_call(move |sink| sink.row_count(&table))
            .await?
            .map_err(fatal)?;
        outcome.table_delta = post_count as i64 - pre_count as i64;

        info!(
            rows_loaded = outcome.rows_loaded,
            batches_failed = outcome.batches_failed,
            retry_attempts = outcome.retry_attempts,
            table_delta = outcome.table_delta,
            "load step finished"
        );
        Ok(outcome)
    }

    /// Enriched records may only carry declared columns.
    fn check_columns(&self, records: &[EnrichedRecord]) -> Result<(), PipelineError> {
        let actual: BTreeSet<String> = records
            .iter()
            .flat_map(|r| r.columns.keys().cloned())
            .collect();
        let undeclared = self.schema.undeclared(&actual);
        if undeclared.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::LoadFatal(format!(
                "records carry columns the table does not declare: {}",
                undeclared.join(", ")
            )))
        }
    }

    async fn write_with_retry(
        &self,
        batch: &LoadBatch,
        outcome: &mut LoadOutcome,
    ) -> Result<(), PipelineError> {
        let index = batch.index;
        let deadline = Duration::from_secs(self.config.write_timeout_secs);
        let mut retries: u32 = 0;
        loop {
            let table = self.config.table.clone();
            let records = Arc::clone(&batch.records);
            let write = self.sink_call(move |sink| sink.write_batch(&table, &records));
            // A timed-out blocking write keeps running in the background;
            // SQLite serializes writers, so the retry queues behind it.
            let result = match tokio::time::timeout(deadline, write).await {
                Ok(result) => result?,
                Err(_) => Err(SinkError::Transient(format!(
                    "batch {index} write exceeded {}s deadline",
                    self.config.write_timeout_secs
                ))),
            };
            match result {
                Ok(written) => {
                    outcome.attempted += batch.records.len() as u64;
                    outcome.confirmed += written;
                    outcome.rows_loaded += written;
                    return Ok(());
                }
                Err(err) if err.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    outcome.retry_attempts += 1;
                    let delay = compute_backoff(self.config.retry_backoff_ms, retries);
                    warn!(
                        batch = index,
                        retry = retries,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient write failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    warn!(batch = index, error = %err, "batch dropped after retry exhaustion");
                    outcome.batches_failed += 1;
                    if self.config.fail_on_batch_error {
                        outcome.fatal = Some(format!(
                            "batch {index} failed after {} retries: {err}",
                            self.config.max_retries
                        ));
                    }
                    return Ok(());
                }
                Err(err) => {
                    warn!(batch = index, error = %err, "non-retriable write failure, halting load");
                    outcome.fatal = Some(err.to_string());
                    return Ok(());
                }
            }
        }
    }

    async fn sink_call<T, F>(&self, f: F) -> Result<granary_warehouse::error::Result<T>, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn WarehouseSink) -> granary_warehouse::error::Result<T> + Send + 'static,
    {
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || f(sink.as_ref()))
            .await
            .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("sink task: {e}")))
    }
}

fn fatal(err: SinkError) -> PipelineError {
    PipelineError::LoadFatal(err.to_string())
}
