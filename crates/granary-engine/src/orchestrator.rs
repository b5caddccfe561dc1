//! Run orchestration: drives extract, transform, load, and
//! reconciliation in sequence and owns the run report.
//!
//! A finished run always yields a [`RunReport`], including runs that
//! fail: fatal pipeline faults land in `report.error` with status
//! `Failed`. The `Err` path is reserved for host-side trouble (task
//! panics) where no meaningful report exists.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use granary_types::report::{Reconciliation, RunReport, RunStage, RunStatus};
use granary_warehouse::{SqliteWarehouse, WarehouseSink};

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::enrich::Enricher;
use crate::errors::PipelineError;
use crate::load::Loader;
use crate::source::read_source;
use crate::validate::{Validator, Verdict};

/// Run a pipeline against the SQLite warehouse named in its load config.
///
/// # Errors
///
/// [`PipelineError::Infrastructure`] only; pipeline faults are reported
/// through the returned [`RunReport`].
pub async fn run_pipeline(
    config: PipelineConfig,
    cancel: &CancelToken,
) -> Result<RunReport, PipelineError> {
    let sink: Arc<dyn WarehouseSink> =
        match SqliteWarehouse::open(Path::new(&config.load.warehouse_path)) {
            Ok(sink) => Arc::new(sink),
            Err(err) => {
                error!(path = %config.load.warehouse_path, %err, "cannot open warehouse");
                let mut report = RunReport::new(&config.pipeline);
                report.started_at = Utc::now().to_rfc3339();
                report.error = Some(format!("cannot open warehouse: {err}"));
                return Ok(report);
            }
        };
    run_pipeline_with_sink(config, sink, cancel).await
}

/// Run a pipeline against a caller-provided sink.
///
/// # Errors
///
/// See [`run_pipeline`].
pub async fn run_pipeline_with_sink(
    config: PipelineConfig,
    sink: Arc<dyn WarehouseSink>,
    cancel: &CancelToken,
) -> Result<RunReport, PipelineError> {
    let start = Instant::now();
    let mut report = RunReport::new(&config.pipeline);
    report.started_at = Utc::now().to_rfc3339();
    info!(pipeline = %config.pipeline, source = config.source.kind(), "run starting");

    match execute(&config, sink, cancel, &mut report).await {
        Ok(()) => {}
        Err(PipelineError::Infrastructure(err)) => return Err(PipelineError::Infrastructure(err)),
        Err(err) => {
            error!(%err, "run failed");
            report.status = RunStatus::Failed;
            report.error = Some(err.to_string());
        }
    }

    report.duration_secs = start.elapsed().as_secs_f64();
    info!(
        pipeline = %report.pipeline,
        status = report.status.as_str(),
        rows_read = report.rows_read,
        rows_rejected = report.rows_rejected,
        rows_loaded = report.rows_loaded,
        duration_secs = report.duration_secs,
        "run finished"
    );
    Ok(report)
}

async fn execute(
    config: &PipelineConfig,
    sink: Arc<dyn WarehouseSink>,
    cancel: &CancelToken,
    report: &mut RunReport,
) -> Result<(), PipelineError> {
    let mut stage = RunStage::Initialized;

    advance(&mut stage, RunStage::Extracting)?;
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let raw = read_source(&config.source).await?;
    report.rows_read = raw.len() as u64;

    advance(&mut stage, RunStage::Transforming)?;
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let mut validator = Validator::new(config.schema.clone(), &config.rules)?;
    let enricher = Enricher::new(config.enrich.clone());
    let mut enriched = Vec::with_capacity(raw.len());
    for record in &raw {
        match validator.check(record) {
            Verdict::Clean(clean) => match enricher.enrich(clean) {
                Ok(record) => enriched.push(record),
                Err(rejection) => report.tally_rejection(rejection.reason),
            },
            Verdict::Rejected(rejection) => report.tally_rejection(rejection.reason),
        }
    }
    info!(
        clean = enriched.len(),
        rejected = report.rows_rejected,
        "transform complete"
    );

    if threshold_crossed(report.rows_read, report.rows_rejected, config.rejection_threshold) {
        warn!(
            rows_rejected = report.rows_rejected,
            rows_read = report.rows_read,
            threshold = config.rejection_threshold,
            "rejection threshold crossed, aborting before load"
        );
        report.status = RunStatus::Failed;
        report.error = Some(format!(
            "rejected {} of {} rows, over the {} threshold",
            report.rows_rejected, report.rows_read, config.rejection_threshold
        ));
        return Ok(());
    }

    advance(&mut stage, RunStage::Loading)?;
    let loader = Loader::new(sink, config.load.clone(), config.schema.clone());
    let outcome = loader.load(enriched, cancel).await?;
    report.rows_loaded = outcome.rows_loaded;
    report.batches_failed = outcome.batches_failed;
    report.retry_attempts = outcome.retry_attempts;

    advance(&mut stage, RunStage::Reconciling)?;
    report.reconciliation = Reconciliation {
        attempted: outcome.attempted,
        confirmed: outcome.confirmed,
        table_delta: outcome.table_delta,
    };
    if !report.reconciliation.is_clean() {
        warn!(
            attempted = report.reconciliation.attempted,
            confirmed = report.reconciliation.confirmed,
            table_delta = report.reconciliation.table_delta,
            "reconciliation mismatch"
        );
    }

    advance(&mut stage, RunStage::Finished)?;
    if let Some(detail) = outcome.fatal {
        // Loading halted partway; the counters above still cover the
        // batches that committed before the failure.
        report.status = RunStatus::Failed;
        report.error = Some(PipelineError::LoadFatal(detail).to_string());
    } else if outcome.cancelled {
        report.status = RunStatus::Failed;
        report.error = Some(PipelineError::Cancelled.to_string());
    } else if report.rows_rejected > 0
        || report.batches_failed > 0
        || !report.reconciliation.is_clean()
    {
        report.status = RunStatus::PartiallySucceeded;
    } else {
        report.status = RunStatus::Succeeded;
    }
    Ok(())
}

fn advance(stage: &mut RunStage, next: RunStage) -> Result<(), PipelineError> {
    if !stage.can_advance_to(next) {
        return Err(PipelineError::Infrastructure(anyhow::anyhow!(
            "illegal stage transition {stage} -> {next}"
        )));
    }
    info!(from = stage.as_str(), to = next.as_str(), "stage transition");
    *stage = next;
    Ok(())
}

/// A threshold of 1.0 disables the guard; anything below fails the run
/// once the rejected fraction reaches it.
fn threshold_crossed(rows_read: u64, rows_rejected: u64, threshold: f64) -> bool {
    if rows_read == 0 || threshold >= 1.0 {
        return false;
    }
    rows_rejected as f64 / rows_read as f64 >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_types::record::RejectReason;

    fn config(yaml: &str) -> PipelineConfig {
        crate::config::parse_pipeline_str(yaml).unwrap()
    }

    fn csv_pipeline(csv_path: &str, warehouse: &str) -> PipelineConfig {
        config(&format!(
            r"
pipeline: orders_daily
source:
  kind: csv
  path: {csv_path}
schema:
  columns:
    - {{ name: TRANSACTION_ID, type: integer, required: true }}
    - {{ name: AMOUNT, type: float, required: true, min: 0.0 }}
load:
  table: orders
  warehouse_path: {warehouse}
rules:
  dedup_key: [TRANSACTION_ID]
"
        ))
    }

    #[test]
    fn threshold_logic() {
        assert!(!threshold_crossed(0, 0, 0.1));
        assert!(!threshold_crossed(100, 9, 0.1));
        assert!(threshold_crossed(100, 10, 0.1));
        // 1.0 disables the guard even at total rejection.
        assert!(!threshold_crossed(100, 100, 1.0));
    }

    #[tokio::test]
    async fn happy_path_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("orders.csv");
        std::fs::write(&csv, "transaction_id,amount\n1,5.0\n2,7.5\n").unwrap();

        let config = csv_pipeline(&csv.display().to_string(), "':memory:'");
        let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
        let report = run_pipeline_with_sink(config, sink, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_loaded, 2);
        assert!(report.reconciliation.is_clean());
        assert!(report.error.is_none());
        assert!(!report.started_at.is_empty());
    }

    #[tokio::test]
    async fn rejections_mean_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("orders.csv");
        std::fs::write(&csv, "transaction_id,amount\n1,5.0\n,7.5\n").unwrap();

        let config = csv_pipeline(&csv.display().to_string(), "':memory:'");
        let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
        let report = run_pipeline_with_sink(config, sink, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::PartiallySucceeded);
        assert_eq!(report.rows_rejected, 1);
        assert_eq!(
            report.rejected_by_reason.get(&RejectReason::MissingField),
            Some(&1)
        );
        assert_eq!(report.rows_loaded, 1);
    }

    #[tokio::test]
    async fn unreachable_source_fails_with_report() {
        let config = csv_pipeline("/nonexistent/orders.csv", "':memory:'");
        let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
        let report = run_pipeline_with_sink(config, sink, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("source unavailable"));
        assert_eq!(report.rows_read, 0);
    }

    #[tokio::test]
    async fn pre_cancelled_run_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("orders.csv");
        std::fs::write(&csv, "transaction_id,amount\n1,5.0\n").unwrap();

        let config = csv_pipeline(&csv.display().to_string(), "':memory:'");
        let sink = Arc::new(SqliteWarehouse::in_memory().unwrap());
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = run_pipeline_with_sink(config, sink, &cancel).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("run cancelled"));
        assert_eq!(report.rows_loaded, 0);
    }

    #[tokio::test]
    async fn unopenable_warehouse_fails_with_report() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("orders.csv");
        std::fs::write(&csv, "transaction_id,amount\n1,5.0\n").unwrap();
        // A directory where the database file should be.
        let blocked = dir.path().join("warehouse.db");
        std::fs::create_dir(&blocked).unwrap();

        let config = csv_pipeline(
            &csv.display().to_string(),
            &blocked.display().to_string(),
        );
        let report = run_pipeline(config, &CancelToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("warehouse"));
    }
}
