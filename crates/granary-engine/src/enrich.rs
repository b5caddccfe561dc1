//! Derived-column enrichment.
//!
//! Derivations are pure functions of the record: same input, same
//! output, no I/O. They run in configuration order, and later ones see
//! the columns earlier ones produced. A derivation that cannot be
//! computed rejects the row with `enrichment_failure` rather than
//! loading a partial record.

use granary_types::record::{
    CleanRecord, Columns, EnrichedRecord, RejectReason, Rejection, Value,
};

use crate::config::Derivation;

pub struct Enricher {
    derivations: Vec<Derivation>,
}

impl Enricher {
    #[must_use]
    pub fn new(derivations: Vec<Derivation>) -> Self {
        Self { derivations }
    }

    /// Apply every derivation to one clean record.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] with [`RejectReason::EnrichmentFailure`]
    /// if any derivation cannot be computed for this row.
    pub fn enrich(&self, clean: CleanRecord) -> Result<EnrichedRecord, Rejection> {
        let row = clean.row;
        // Quality score is a property of the source data: it is measured
        // over the base columns, excluding the placeholders the schema
        // declares for derivation targets.
        let targets: std::collections::BTreeSet<&str> =
            self.derivations.iter().map(Derivation::target).collect();
        let base_non_null = clean
            .columns
            .iter()
            .filter(|(name, value)| !targets.contains(name.as_str()) && !value.is_null())
            .count();
        let base_total = clean
            .columns
            .keys()
            .filter(|name| !targets.contains(name.as_str()))
            .count();

        let mut working = clean.columns.clone();
        let mut derived = Columns::new();
        for derivation in &self.derivations {
            let value = match derivation {
                Derivation::NormalizeCategory { column, map, .. } => {
                    normalize_category(&working, column, map).map_err(|detail| {
                        Rejection::new(row, RejectReason::EnrichmentFailure, detail)
                    })?
                }
                Derivation::LineTotal { quantity, unit_price, .. } => {
                    line_total(&working, quantity, unit_price).map_err(|detail| {
                        Rejection::new(row, RejectReason::EnrichmentFailure, detail)
                    })?
                }
                Derivation::QualityScore { .. } => quality_score(base_non_null, base_total),
            };
            working.insert(derivation.target().to_string(), value.clone());
            derived.insert(derivation.target().to_string(), value);
        }
        Ok(EnrichedRecord::from_clean(clean, derived))
    }
}

fn normalize_category(
    columns: &Columns,
    column: &str,
    map: &std::collections::BTreeMap<String, String>,
) -> Result<Value, String> {
    match columns.get(column) {
        None | Some(Value::Null) => Ok(Value::Null),
        Some(Value::Text(s)) => {
            let normalized = s.trim().to_uppercase();
            if map.is_empty() {
                return Ok(Value::Text(normalized));
            }
            map.get(&normalized)
                .map(|mapped| Value::Text(mapped.clone()))
                .ok_or_else(|| {
                    format!("category '{normalized}' has no entry in the '{column}' map")
                })
        }
        Some(other) => Err(format!("column '{column}' holds non-text value {other}")),
    }
}

fn line_total(columns: &Columns, quantity: &str, unit_price: &str) -> Result<Value, String> {
    let q = numeric(columns, quantity)?;
    let p = numeric(columns, unit_price)?;
    match (q, p) {
        (Some(q), Some(p)) => Ok(Value::Float(q * p)),
        _ => Ok(Value::Null),
    }
}

fn numeric(columns: &Columns, column: &str) -> Result<Option<f64>, String> {
    match columns.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(i)) => Ok(Some(*i as f64)),
        Some(Value::Float(f)) => Ok(Some(*f)),
        Some(other) => Err(format!("column '{column}' holds non-numeric value {other}")),
    }
}

/// Percentage of non-null base columns, rounded to 2 decimal places.
fn quality_score(non_null: usize, total: usize) -> Value {
    if total == 0 {
        return Value::Float(0.0);
    }
    let pct = non_null as f64 / total as f64 * 100.0;
    Value::Float((pct * 100.0).round() / 100.0)
}
