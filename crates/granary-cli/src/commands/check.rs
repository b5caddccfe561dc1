use std::path::Path;

use anyhow::Result;

use granary_engine::config::parse_pipeline;

/// Execute the `check` command: parse and validate a pipeline file
/// without touching the source or the warehouse.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    let config = parse_pipeline(pipeline_path)?;

    println!("Pipeline '{}' is valid.", config.pipeline);
    println!("  Source:    {}", config.source.kind());
    println!("  Columns:   {}", config.schema.columns.len());
    println!("  Rules:     dedup key {:?}", config.rules.dedup_key);
    println!("  Enrich:    {} derivation(s)", config.enrich.len());
    println!(
        "  Load:      table '{}' in {} (batch size {})",
        config.load.table, config.load.warehouse_path, config.load.batch_size
    );
    Ok(())
}
