//! Declared target table schema.
//!
//! The schema is consumed, not designed, by this pipeline: it mirrors the
//! warehouse DDL and drives both validation (types, ranges, required
//! columns) and the loader's column-set gate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::Value;

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Bool,
}

impl ColumnType {
    /// Whether an already-coerced value inhabits this type.
    /// Null is accepted for any type; required-ness is a separate rule.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null)
            | (Self::Integer, Value::Integer(_))
            | (Self::Float, Value::Float(_) | Value::Integer(_))
            | (Self::Text, Value::Text(_))
            | (Self::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

/// One declared column: name, type, and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub required: bool,
    /// Inclusive lower bound (numeric columns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound (numeric columns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Declared column set for the target table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    #[must_use]
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Look up a column spec by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Declared column names, in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns present in `actual` that the schema does not declare.
    ///
    /// Used by the loader's schema gate: enriched records may only carry
    /// declared columns.
    #[must_use]
    pub fn undeclared<'a>(&self, actual: &'a BTreeSet<String>) -> Vec<&'a str> {
        let declared: BTreeSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        actual
            .iter()
            .map(String::as_str)
            .filter(|name| !declared.contains(name))
            .collect()
    }
}
