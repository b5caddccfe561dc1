use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for the CLI process.
///
/// `RUST_LOG` wins when present; otherwise the `--log-level` flag value
/// becomes the filter. Targets are omitted, the run's structured fields
/// carry the context.
pub fn init(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
