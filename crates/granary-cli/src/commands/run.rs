use std::path::Path;

use anyhow::{bail, Result};

use granary_engine::config::parse_pipeline;
use granary_engine::{run_pipeline, CancelToken};
use granary_types::{RunReport, RunStatus};

/// Execute the `run` command: parse a pipeline file and run it to a
/// finished report. Ctrl-C cancels the run cooperatively.
pub async fn execute(pipeline_path: &Path, json: bool) -> Result<()> {
    let config = parse_pipeline(pipeline_path)?;

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            signal_token.cancel();
        }
    });

    let report = run_pipeline(config, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    match report.status {
        RunStatus::Failed => {
            bail!(
                "pipeline '{}' failed: {}",
                report.pipeline,
                report.error.as_deref().unwrap_or("see report")
            )
        }
        RunStatus::PartiallySucceeded | RunStatus::Succeeded => Ok(()),
    }
}

fn print_summary(report: &RunReport) {
    println!(
        "Pipeline '{}' finished: {}",
        report.pipeline, report.status
    );
    println!("  Rows read:       {}", report.rows_read);
    println!("  Rows rejected:   {}", report.rows_rejected);
    for (reason, count) in &report.rejected_by_reason {
        println!("    {:<18} {}", format!("{reason}:"), count);
    }
    println!("  Rows loaded:     {}", report.rows_loaded);
    if report.batches_failed > 0 {
        println!("  Batches failed:  {}", report.batches_failed);
    }
    if report.retry_attempts > 0 {
        println!("  Retries:         {}", report.retry_attempts);
    }
    println!(
        "  Reconciliation:  attempted {}, confirmed {}, table delta {}{}",
        report.reconciliation.attempted,
        report.reconciliation.confirmed,
        report.reconciliation.table_delta,
        if report.reconciliation.is_clean() { "" } else { "  (MISMATCH)" }
    );
    println!("  Duration:        {:.2}s", report.duration_secs);
    if let Some(error) = &report.error {
        println!("  Error:           {error}");
    }
}
