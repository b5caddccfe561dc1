//! Semantic validation of a parsed pipeline definition.
//!
//! All problems are collected and reported in one error so a user fixes
//! the file once, not once per mistake.

use std::collections::BTreeSet;

use anyhow::{bail, Result};

use granary_types::schema::ColumnType;

use super::types::{Derivation, PipelineConfig, SourceConfig};

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a parsed pipeline definition.
///
/// # Errors
///
/// Returns a single error listing every semantic problem found.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    if config.pipeline.trim().is_empty() {
        errors.push("pipeline name must not be empty".to_string());
    }

    validate_source(&config.source, &mut errors);
    validate_schema(config, &mut errors);
    validate_rules(config, &mut errors);
    validate_enrich(config, &mut errors);
    validate_load(config, &mut errors);

    if !(0.0..=1.0).contains(&config.rejection_threshold) {
        errors.push(format!(
            "rejection_threshold must be within [0.0, 1.0], got {}",
            config.rejection_threshold
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

fn validate_source(source: &SourceConfig, errors: &mut Vec<String>) {
    match source {
        SourceConfig::Csv { path } | SourceConfig::Json { path } => {
            if path.trim().is_empty() {
                errors.push(format!("{} source path must not be empty", source.kind()));
            }
        }
        SourceConfig::Api { url, page_size, timeout_secs } => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(format!("api source url must be http(s), got '{url}'"));
            }
            if *page_size == 0 {
                errors.push("api source page_size must be at least 1".to_string());
            }
            if *timeout_secs == 0 {
                errors.push("api source timeout_secs must be at least 1".to_string());
            }
        }
    }
}

fn validate_schema(config: &PipelineConfig, errors: &mut Vec<String>) {
    if config.schema.columns.is_empty() {
        errors.push("schema must declare at least one column".to_string());
    }
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for column in &config.schema.columns {
        if !is_identifier(&column.name) {
            errors.push(format!("schema column '{}' is not a valid identifier", column.name));
        }
        if column.name != column.name.to_uppercase() {
            errors.push(format!("schema column '{}' must be uppercase", column.name));
        }
        if !seen.insert(column.name.as_str()) {
            errors.push(format!("schema column '{}' declared more than once", column.name));
        }
        if (column.min.is_some() || column.max.is_some())
            && !matches!(column.column_type, ColumnType::Integer | ColumnType::Float)
        {
            errors.push(format!(
                "schema column '{}' declares a range but is not numeric",
                column.name
            ));
        }
        if let (Some(min), Some(max)) = (column.min, column.max) {
            if min > max {
                errors.push(format!(
                    "schema column '{}' has min {min} greater than max {max}",
                    column.name
                ));
            }
        }
    }
}

fn validate_rules(config: &PipelineConfig, errors: &mut Vec<String>) {
    for key in &config.rules.dedup_key {
        if config.schema.column(key).is_none() {
            errors.push(format!("dedup_key column '{key}' is not declared in the schema"));
        }
    }
}

fn validate_enrich(config: &PipelineConfig, errors: &mut Vec<String>) {
    // Derivations run in order, so a later rule may read an earlier
    // rule's output.
    let mut known: BTreeSet<String> = config
        .schema
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect();
    for derivation in &config.enrich {
        let target = derivation.target();
        if !is_identifier(target) || target != target.to_uppercase() {
            errors.push(format!(
                "derived column '{target}' must be an uppercase identifier"
            ));
        }
        // The loader only writes declared columns, so every derived
        // column needs a schema entry.
        if config.schema.column(target).is_none() {
            errors.push(format!(
                "derived column '{target}' is not declared in the schema"
            ));
        }
        match derivation {
            Derivation::NormalizeCategory { column, .. } => {
                if !known.contains(column) {
                    errors.push(format!(
                        "normalize_category reads unknown column '{column}'"
                    ));
                }
            }
            Derivation::LineTotal { quantity, unit_price, .. } => {
                for column in [quantity, unit_price] {
                    if !known.contains(column) {
                        errors.push(format!("line_total reads unknown column '{column}'"));
                    }
                }
            }
            Derivation::QualityScore { .. } => {}
        }
        known.insert(target.to_string());
    }
}

fn validate_load(config: &PipelineConfig, errors: &mut Vec<String>) {
    let load = &config.load;
    if !is_identifier(&load.table) {
        errors.push(format!("load table '{}' is not a valid identifier", load.table));
    }
    if load.warehouse_path.trim().is_empty() {
        errors.push("load warehouse_path must not be empty".to_string());
    }
    if load.batch_size == 0 {
        errors.push("load batch_size must be at least 1".to_string());
    }
    if load.write_timeout_secs == 0 {
        errors.push("load write_timeout_secs must be at least 1".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn base_yaml() -> String {
        r"
pipeline: orders_daily
source:
  kind: csv
  path: data/orders.csv
schema:
  columns:
    - { name: TRANSACTION_ID, type: integer, required: true }
    - { name: AMOUNT, type: float, min: 0.0, max: 100000.0 }
    - { name: CATEGORY, type: text }
    - { name: QUALITY_SCORE, type: float }
rules:
  dedup_key: [TRANSACTION_ID]
enrich:
  - quality_score: { into: QUALITY_SCORE }
load:
  table: orders
  warehouse_path: ':memory:'
"
        .to_string()
    }

    #[test]
    fn accepts_valid_pipeline() {
        parse_pipeline_str(&base_yaml()).unwrap();
    }

    #[test]
    fn rejects_undeclared_dedup_key() {
        let yaml = base_yaml().replace("[TRANSACTION_ID]", "[ORDER_ID]");
        let err = parse_pipeline_str(&yaml).unwrap_err().to_string();
        assert!(format!("{err:#}").contains("ORDER_ID") || err.contains("ORDER_ID"));
    }

    #[test]
    fn rejects_duplicate_schema_column() {
        let yaml = base_yaml().replace(
            "- { name: CATEGORY, type: text }",
            "- { name: CATEGORY, type: text }\n    - { name: CATEGORY, type: text }",
        );
        assert!(parse_pipeline_str(&yaml).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        let yaml = base_yaml().replace("min: 0.0, max: 100000.0", "min: 10.0, max: 1.0");
        assert!(parse_pipeline_str(&yaml).is_err());
    }

    #[test]
    fn rejects_range_on_text_column() {
        let yaml = base_yaml().replace(
            "- { name: CATEGORY, type: text }",
            "- { name: CATEGORY, type: text, min: 1.0 }",
        );
        assert!(parse_pipeline_str(&yaml).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_threshold() {
        let yaml = format!("{}rejection_threshold: 1.5\n", base_yaml());
        assert!(parse_pipeline_str(&yaml).is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let yaml = base_yaml().replace(
            "warehouse_path: ':memory:'",
            "warehouse_path: ':memory:'\n  batch_size: 0",
        );
        assert!(parse_pipeline_str(&yaml).is_err());
    }

    #[test]
    fn rejects_non_http_api_url() {
        let yaml = base_yaml().replace(
            "kind: csv\n  path: data/orders.csv",
            "kind: api\n  url: ftp://example.com/orders",
        );
        assert!(parse_pipeline_str(&yaml).is_err());
    }

    #[test]
    fn derivation_may_read_earlier_output() {
        let yaml = base_yaml()
            .replace(
                "- { name: QUALITY_SCORE, type: float }",
                "- { name: QUALITY_SCORE, type: float }\n    - { name: CATEGORY_NORM, type: text }\n    - { name: CATEGORY_FINAL, type: text }",
            )
            .replace(
                "- quality_score: { into: QUALITY_SCORE }",
                "- normalize_category: { column: CATEGORY, into: CATEGORY_NORM }\n  - normalize_category: { column: CATEGORY_NORM, into: CATEGORY_FINAL }",
            );
        parse_pipeline_str(&yaml).unwrap();
    }

    #[test]
    fn rejects_undeclared_derived_column() {
        let yaml = base_yaml().replace(
            "- quality_score: { into: QUALITY_SCORE }",
            "- quality_score: { into: SCORE }",
        );
        let err = parse_pipeline_str(&yaml).unwrap_err();
        assert!(format!("{err:#}").contains("SCORE"));
    }

    #[test]
    fn collects_multiple_errors() {
        let yaml = base_yaml()
            .replace("[TRANSACTION_ID]", "[ORDER_ID]")
            .replace("table: orders", "table: 'bad table'");
        let err = parse_pipeline_str(&yaml).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("ORDER_ID"));
        assert!(msg.contains("bad table"));
    }
}
