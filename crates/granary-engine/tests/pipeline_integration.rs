//! End-to-end pipeline runs against real files and an embedded
//! warehouse.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};

use granary_engine::config::{parse_pipeline_str, PipelineConfig};
use granary_engine::{run_pipeline_with_sink, CancelToken};
use granary_types::record::{Columns, EnrichedRecord, RejectReason, Value};
use granary_types::{RunStatus, TableSchema};
use granary_warehouse::{SinkError, SqliteWarehouse, WarehouseSink};

fn pipeline_yaml(csv_path: &Path, extra: &str) -> String {
    format!(
        r"
pipeline: retail_daily
source:
  kind: csv
  path: {path}
schema:
  columns:
    - {{ name: TRANSACTION_ID, type: integer, required: true }}
    - {{ name: AMOUNT, type: float, required: true, min: 0.0 }}
    - {{ name: CATEGORY, type: text }}
    - {{ name: QUALITY_SCORE, type: float }}
rules:
  dedup_key: [TRANSACTION_ID]
enrich:
  - quality_score: {{ into: QUALITY_SCORE }}
load:
  table: retail_transactions
  warehouse_path: ':memory:'
  batch_size: 100
{extra}",
        path = csv_path.display()
    )
}

fn parse(yaml: &str) -> PipelineConfig {
    parse_pipeline_str(yaml).unwrap()
}

/// 1000 rows: 940 valid, 50 with a missing required amount, 10
/// duplicate transaction ids.
fn mixed_csv() -> String {
    let mut csv = String::from("transaction_id,amount,category\n");
    for id in 1..=940 {
        writeln!(csv, "{id},{}.50,retail", id % 90).unwrap();
    }
    for id in 2001..=2050 {
        writeln!(csv, "{id},,retail").unwrap();
    }
    for id in 1..=10 {
        writeln!(csv, "{id},99.0,retail").unwrap();
    }
    csv
}

/// Sink double that fails `write_batch` transiently a configured number
/// of times before delegating to a real in-memory warehouse.
struct FlakySink {
    inner: SqliteWarehouse,
    failures_left: Mutex<u32>,
}

impl FlakySink {
    fn failing(times: u32) -> Self {
        Self {
            inner: SqliteWarehouse::in_memory().unwrap(),
            failures_left: Mutex::new(times),
        }
    }
}

impl WarehouseSink for FlakySink {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> granary_warehouse::error::Result<()> {
        self.inner.ensure_table(table, schema)
    }

    fn truncate(&self, table: &str) -> granary_warehouse::error::Result<()> {
        self.inner.truncate(table)
    }

    fn write_batch(
        &self,
        table: &str,
        records: &[EnrichedRecord],
    ) -> granary_warehouse::error::Result<u64> {
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Err(SinkError::Transient("database is locked".into()));
        }
        drop(left);
        self.inner.write_batch(table, records)
    }

    fn row_count(&self, table: &str) -> granary_warehouse::error::Result<u64> {
        self.inner.row_count(table)
    }

    fn fetch_all(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> granary_warehouse::error::Result<Vec<Columns>> {
        self.inner.fetch_all(table, schema)
    }
}

/// Sink double whose first batch write lands and every later one fails
/// non-retriably.
struct FatalSecondBatchSink {
    inner: SqliteWarehouse,
    writes: Mutex<u32>,
}

impl FatalSecondBatchSink {
    fn new() -> Self {
        Self {
            inner: SqliteWarehouse::in_memory().unwrap(),
            writes: Mutex::new(0),
        }
    }
}

impl WarehouseSink for FatalSecondBatchSink {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> granary_warehouse::error::Result<()> {
        self.inner.ensure_table(table, schema)
    }

    fn truncate(&self, table: &str) -> granary_warehouse::error::Result<()> {
        self.inner.truncate(table)
    }

    fn write_batch(
        &self,
        table: &str,
        records: &[EnrichedRecord],
    ) -> granary_warehouse::error::Result<u64> {
        let mut writes = self.writes.lock().unwrap();
        *writes += 1;
        if *writes > 1 {
            return Err(SinkError::Fatal("constraint violation".into()));
        }
        drop(writes);
        self.inner.write_batch(table, records)
    }

    fn row_count(&self, table: &str) -> granary_warehouse::error::Result<u64> {
        self.inner.row_count(table)
    }

    fn fetch_all(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> granary_warehouse::error::Result<Vec<Columns>> {
        self.inner.fetch_all(table, schema)
    }
}

/// Sink double that cancels the shared token from inside the first
/// batch write, after the write lands.
struct CancellingSink {
    inner: SqliteWarehouse,
    cancel: CancelToken,
}

impl WarehouseSink for CancellingSink {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> granary_warehouse::error::Result<()> {
        self.inner.ensure_table(table, schema)
    }

    fn truncate(&self, table: &str) -> granary_warehouse::error::Result<()> {
        self.inner.truncate(table)
    }

    fn write_batch(
        &self,
        table: &str,
        records: &[EnrichedRecord],
    ) -> granary_warehouse::error::Result<u64> {
        let written = self.inner.write_batch(table, records)?;
        self.cancel.cancel();
        Ok(written)
    }

    fn row_count(&self, table: &str) -> granary_warehouse::error::Result<u64> {
        self.inner.row_count(table)
    }

    fn fetch_all(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> granary_warehouse::error::Result<Vec<Columns>> {
        self.inner.fetch_all(table, schema)
    }
}

#[tokio::test]
async fn mixed_batch_partially_succeeds_and_conserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    std::fs::write(&csv, mixed_csv()).unwrap();

    let config = parse(&pipeline_yaml(&csv, ""));
    let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
    let report = run_pipeline_with_sink(config, Arc::clone(&sink) as Arc<dyn WarehouseSink>, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert_eq!(report.rows_read, 1000);
    assert_eq!(report.rows_rejected, 60);
    assert_eq!(
        report.rejected_by_reason.get(&RejectReason::MissingField),
        Some(&50)
    );
    assert_eq!(
        report.rejected_by_reason.get(&RejectReason::DuplicateRecord),
        Some(&10)
    );
    assert_eq!(report.rows_loaded, 940);
    // Conservation: every row read is either loaded or rejected.
    assert_eq!(report.rows_read, report.rows_loaded + report.rows_rejected);
    assert!(report.reconciliation.is_clean());
    assert_eq!(sink.row_count("retail_transactions").unwrap(), 940);
}

#[tokio::test]
async fn transient_failures_retried_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    std::fs::write(&csv, "transaction_id,amount,category\n1,5.0,a\n2,6.0,b\n").unwrap();

    let config = parse(&pipeline_yaml(&csv, "  retry_backoff_ms: 1\n"));
    let sink = Arc::new(FlakySink::failing(2));
    let report = run_pipeline_with_sink(config, sink, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.retry_attempts, 2);
    assert_eq!(report.batches_failed, 0);
    assert_eq!(report.rows_loaded, 2);
}

#[tokio::test]
async fn retry_exhaustion_counts_failed_batch() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    let mut body = String::from("transaction_id,amount,category\n");
    for id in 1..=150 {
        writeln!(body, "{id},1.0,a").unwrap();
    }
    std::fs::write(&csv, body).unwrap();

    // 5 transient failures against max_retries=4 exhaust the first
    // 100-row batch; the 50-row batch then writes clean.
    let config = parse(&pipeline_yaml(&csv, "  max_retries: 4\n  retry_backoff_ms: 1\n"));
    let sink = Arc::new(FlakySink::failing(5));
    let report = run_pipeline_with_sink(config, sink, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.retry_attempts, 4);
    assert_eq!(report.rows_loaded, 50);
    assert!(report.reconciliation.is_clean());
}

#[tokio::test]
async fn mid_load_fatal_fails_run_but_keeps_committed_rows_accounted() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    let mut body = String::from("transaction_id,amount,category\n");
    for id in 1..=300 {
        writeln!(body, "{id},1.0,a").unwrap();
    }
    std::fs::write(&csv, body).unwrap();

    let sink = Arc::new(FatalSecondBatchSink::new());
    let report = run_pipeline_with_sink(
        parse(&pipeline_yaml(&csv, "")),
        Arc::clone(&sink) as Arc<dyn WarehouseSink>,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("load failed"));
    // The 100-row batch that committed before the failure is reported,
    // and the report's counts match what the table actually holds.
    assert_eq!(report.rows_loaded, 100);
    assert_eq!(report.reconciliation.attempted, 100);
    assert_eq!(report.reconciliation.confirmed, 100);
    assert_eq!(report.reconciliation.table_delta, 100);
    assert_eq!(sink.row_count("retail_transactions").unwrap(), 100);
}

#[tokio::test]
async fn loaded_values_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    std::fs::write(
        &csv,
        "transaction_id,amount,category\n7,12.5, widgets \n8,3.0,\n",
    )
    .unwrap();

    let config = parse(&pipeline_yaml(&csv, ""));
    let schema = config.schema.clone();
    let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
    let report = run_pipeline_with_sink(
        config,
        Arc::clone(&sink) as Arc<dyn WarehouseSink>,
        &CancelToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);

    let rows = sink.fetch_all("retail_transactions", &schema).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("TRANSACTION_ID"), Some(&Value::Integer(7)));
    assert_eq!(rows[0].get("AMOUNT"), Some(&Value::Float(12.5)));
    // Text is trimmed during cleaning, not at the sink.
    assert_eq!(rows[0].get("CATEGORY"), Some(&Value::Text("widgets".into())));
    assert_eq!(rows[0].get("QUALITY_SCORE"), Some(&Value::Float(100.0)));
    assert_eq!(rows[1].get("CATEGORY"), Some(&Value::Null));
    assert_eq!(rows[1].get("QUALITY_SCORE"), Some(&Value::Float(66.67)));
}

#[tokio::test]
async fn truncate_before_load_makes_reruns_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    std::fs::write(&csv, "transaction_id,amount,category\n1,5.0,a\n2,6.0,b\n").unwrap();

    let yaml = pipeline_yaml(&csv, "  truncate_before_load: true\n");
    let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
    for _ in 0..2 {
        let report = run_pipeline_with_sink(
            parse(&yaml),
            Arc::clone(&sink) as Arc<dyn WarehouseSink>,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(report.reconciliation.is_clean());
    }
    assert_eq!(sink.row_count("retail_transactions").unwrap(), 2);
}

#[tokio::test]
async fn rejection_threshold_fails_run_before_load() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    let mut body = String::from("transaction_id,amount,category\n");
    for id in 1..=94 {
        writeln!(body, "{id},1.0,a").unwrap();
    }
    for id in 95..=100 {
        writeln!(body, "{id},,a").unwrap();
    }
    std::fs::write(&csv, body).unwrap();

    let yaml = format!("{}rejection_threshold: 0.05\n", pipeline_yaml(&csv, ""));
    let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
    let report = run_pipeline_with_sink(
        parse(&yaml),
        Arc::clone(&sink) as Arc<dyn WarehouseSink>,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.rows_rejected, 6);
    assert_eq!(report.rows_loaded, 0);
    assert!(report.error.as_deref().unwrap().contains("threshold"));
    // Nothing reached the warehouse.
    assert!(sink.row_count("retail_transactions").is_err());
}

#[tokio::test]
async fn cancellation_mid_load_stops_new_batches() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("transactions.csv");
    let mut body = String::from("transaction_id,amount,category\n");
    for id in 1..=300 {
        writeln!(body, "{id},1.0,a").unwrap();
    }
    std::fs::write(&csv, body).unwrap();

    let cancel = CancelToken::new();
    let sink = Arc::new(CancellingSink {
        inner: SqliteWarehouse::in_memory().unwrap(),
        cancel: cancel.clone(),
    });
    let report = run_pipeline_with_sink(
        parse(&pipeline_yaml(&csv, "")),
        Arc::clone(&sink) as Arc<dyn WarehouseSink>,
        &cancel,
    )
    .await
    .unwrap();

    // The in-flight 100-row batch finished; the remaining two never ran.
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.as_deref(), Some("run cancelled"));
    assert_eq!(report.rows_loaded, 100);
    assert_eq!(sink.row_count("retail_transactions").unwrap(), 100);
    assert!(report.reconciliation.is_clean());
}

#[tokio::test]
async fn json_source_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let json = dir.path().join("transactions.json");
    std::fs::write(
        &json,
        r#"[{"transaction_id": 1, "amount": 5.5, "category": "a"},
            {"transaction_id": 2, "amount": 6, "category": null}]"#,
    )
    .unwrap();

    let yaml = pipeline_yaml(&json, "").replace("kind: csv", "kind: json");
    let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
    let report = run_pipeline_with_sink(
        parse(&yaml),
        Arc::clone(&sink) as Arc<dyn WarehouseSink>,
        &CancelToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.rows_loaded, 2);
}
