//! Record types for each pipeline stage.
//!
//! A row is a `column name -> Value` map. [`RawRecord`] is what the source
//! reader produces, [`CleanRecord`] is a raw record after coercion and rule
//! checks, and [`EnrichedRecord`] adds derived columns. Rows that fail a
//! rule become [`Rejection`] values; rejection is data, not a fault.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar cell value.
///
/// Closed set: sources produce only these shapes, and the warehouse sink
/// maps them 1:1 onto SQL storage classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON scalar into a [`Value`].
    ///
    /// Returns `None` for nested arrays/objects — sources are expected to
    /// deliver flat rows, and anything nested is a format error upstream.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Convert into a JSON scalar.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Text(s) => serde_json::Value::from(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Ordered column map shared by the record types.
pub type Columns = BTreeMap<String, Value>;

/// A row exactly as read from the source, untyped and unvalidated.
///
/// `row` is the 1-based position in source order, used for rejection
/// reporting. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub row: u64,
    pub columns: Columns,
}

impl RawRecord {
    #[must_use]
    pub fn new(row: u64, columns: Columns) -> Self {
        Self { row, columns }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// A raw record after type coercion and rule checks.
///
/// Invariant: every `CleanRecord` satisfies the declared schema — required
/// columns present and non-null, values coerced to the declared type and
/// within the declared range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub row: u64,
    pub columns: Columns,
}

impl CleanRecord {
    #[must_use]
    pub fn new(row: u64, columns: Columns) -> Self {
        Self { row, columns }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// A clean record plus derived columns.
///
/// Invariant: every derived column is a pure function of the base columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub row: u64,
    pub columns: Columns,
}

impl EnrichedRecord {
    /// Build from a clean record plus derived columns. Derived columns
    /// overwrite base columns on name collision.
    #[must_use]
    pub fn from_clean(base: CleanRecord, derived: Columns) -> Self {
        let mut columns = base.columns;
        columns.extend(derived);
        Self {
            row: base.row,
            columns,
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// Why a row was rejected. First failing rule wins; later rules are not
/// evaluated for that row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Required column absent or null.
    MissingField,
    /// Value could not be coerced to the declared column type.
    TypeMismatch,
    /// Dedup key already seen earlier in this run.
    DuplicateRecord,
    /// Value outside the declared min/max range.
    OutOfRange,
    /// A derivation could not be computed (e.g. missing lookup entry).
    EnrichmentFailure,
}

impl RejectReason {
    /// Wire-format string for report tallies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::TypeMismatch => "type_mismatch",
            Self::DuplicateRecord => "duplicate_record",
            Self::OutOfRange => "out_of_range",
            Self::EnrichmentFailure => "enrichment_failure",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected row: source position, reason, and a human-readable detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub row: u64,
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejection {
    #[must_use]
    pub fn new(row: u64, reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            row,
            reason,
            detail: detail.into(),
        }
    }
}
