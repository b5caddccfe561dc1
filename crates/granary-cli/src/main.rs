mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "granary",
    version,
    about = "Single-binary batch ETL into an embedded warehouse"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline end to end
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Print the full run report as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate a pipeline file without running it
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline, json } => commands::run::execute(&pipeline, json).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
    }
}
