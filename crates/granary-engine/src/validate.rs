//! Validation and cleaning of raw records.
//!
//! Rules run in a fixed order per row: presence, type coercion,
//! duplicate detection, range. The first failing rule rejects the row
//! and later rules are not evaluated. Column names are folded to
//! uppercase and text values trimmed before any rule runs; columns the
//! schema does not declare are dropped silently.

use std::collections::HashSet;

use tracing::debug;

use granary_types::record::{
    CleanRecord, Columns, RawRecord, RejectReason, Rejection, Value,
};
use granary_types::schema::{ColumnType, TableSchema};

use crate::config::RuleConfig;
use crate::errors::PipelineError;

/// Outcome of checking one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Clean(CleanRecord),
    Rejected(Rejection),
}

/// Stateful per-run validator. Duplicate detection is scoped to one
/// `Validator` instance; the first occurrence of a key wins.
#[derive(Debug)]
pub struct Validator {
    schema: TableSchema,
    dedup_key: Vec<String>,
    seen: HashSet<String>,
}

impl Validator {
    /// # Errors
    ///
    /// [`PipelineError::RuleConfig`] if the dedup key names a column the
    /// schema does not declare.
    pub fn new(schema: TableSchema, rules: &RuleConfig) -> Result<Self, PipelineError> {
        for key in &rules.dedup_key {
            if schema.column(key).is_none() {
                return Err(PipelineError::RuleConfig(format!(
                    "dedup_key column '{key}' is not declared in the schema"
                )));
            }
        }
        Ok(Self {
            schema,
            dedup_key: rules.dedup_key.clone(),
            seen: HashSet::new(),
        })
    }

    /// Run every rule against one raw record.
    pub fn check(&mut self, raw: &RawRecord) -> Verdict {
        let columns = self.normalize(raw);

        // Presence: required columns must be there and non-null.
        for spec in &self.schema.columns {
            if !spec.required {
                continue;
            }
            match columns.get(&spec.name) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return self.reject(
                        raw.row,
                        RejectReason::MissingField,
                        format!("required column '{}' is missing or null", spec.name),
                    );
                }
            }
        }

        // Type coercion, in declared column order.
        let mut coerced = Columns::new();
        for spec in &self.schema.columns {
            let value = columns.get(&spec.name).cloned().unwrap_or(Value::Null);
            match coerce(spec.column_type, value) {
                Ok(value) => {
                    coerced.insert(spec.name.clone(), value);
                }
                Err(detail) => {
                    return self.reject(
                        raw.row,
                        RejectReason::TypeMismatch,
                        format!("column '{}': {detail}", spec.name),
                    );
                }
            }
        }

        // Duplicate: identity is the dedup key, or the whole row when no
        // key is configured.
        let identity = self.identity(&coerced);
        if !self.seen.insert(identity.clone()) {
            return self.reject(
                raw.row,
                RejectReason::DuplicateRecord,
                format!("duplicate of an earlier row (key: {identity})"),
            );
        }

        // Range, numeric columns only, bounds inclusive.
        for spec in &self.schema.columns {
            let Some(value) = coerced.get(&spec.name) else { continue };
            let out_of_range = match value {
                Value::Integer(i) => int_out_of_range(*i, spec.min, spec.max),
                Value::Float(f) => {
                    spec.min.is_some_and(|min| *f < min) || spec.max.is_some_and(|max| *f > max)
                }
                _ => false,
            };
            if out_of_range {
                return self.reject(
                    raw.row,
                    RejectReason::OutOfRange,
                    format!(
                        "column '{}' value {value} outside [{:?}, {:?}]",
                        spec.name, spec.min, spec.max
                    ),
                );
            }
        }

        Verdict::Clean(CleanRecord::new(raw.row, coerced))
    }

    /// Fold column names to uppercase, trim text, drop undeclared
    /// columns. Whitespace-only text becomes null so the presence rule
    /// treats it as absent.
    fn normalize(&self, raw: &RawRecord) -> Columns {
        let mut columns = Columns::new();
        for (name, value) in &raw.columns {
            let folded = name.trim().to_uppercase();
            if self.schema.column(&folded).is_none() {
                continue;
            }
            let value = match value {
                Value::Text(s) => {
                    let trimmed = s.trim();
                    if trimmed.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(trimmed.to_string())
                    }
                }
                other => other.clone(),
            };
            columns.insert(folded, value);
        }
        columns
    }

    fn identity(&self, coerced: &Columns) -> String {
        if self.dedup_key.is_empty() {
            coerced
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("\u{1f}")
        } else {
            self.dedup_key
                .iter()
                .map(|key| {
                    coerced
                        .get(key)
                        .map_or_else(|| "NULL".to_string(), ToString::to_string)
                })
                .collect::<Vec<_>>()
                .join("\u{1f}")
        }
    }

    fn reject(&self, row: u64, reason: RejectReason, detail: String) -> Verdict {
        debug!(row, reason = reason.as_str(), %detail, "row rejected");
        Verdict::Rejected(Rejection::new(row, reason, detail))
    }
}

/// Integer range check without the lossy `as f64` cast: past 2^53 that
/// cast collapses distinct values onto one float. The bounds are brought
/// over to i128 instead; float-to-int `as` saturates, so bounds beyond
/// the i128 range still compare correctly.
fn int_out_of_range(value: i64, min: Option<f64>, max: Option<f64>) -> bool {
    let value = i128::from(value);
    let below = min.is_some_and(|min| value < min.ceil() as i128);
    let above = max.is_some_and(|max| value > max.floor() as i128);
    below || above
}

/// Coerce a normalized value into the declared column type. Null always
/// passes; required-ness was already checked.
fn coerce(column_type: ColumnType, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match (column_type, value) {
        (ColumnType::Integer, Value::Integer(i)) => Ok(Value::Integer(i)),
        (ColumnType::Integer, Value::Text(s)) => s
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("'{s}' is not an integer")),
        (ColumnType::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
        (ColumnType::Float, Value::Text(s)) => s
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("'{s}' is not a number")),
        (ColumnType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (ColumnType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ColumnType::Bool, Value::Integer(0)) => Ok(Value::Bool(false)),
        (ColumnType::Bool, Value::Integer(1)) => Ok(Value::Bool(true)),
        (ColumnType::Bool, Value::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        (expected, actual) => Err(format!("{actual} does not fit {expected:?}")),
    }
}
