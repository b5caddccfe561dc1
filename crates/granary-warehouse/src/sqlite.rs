//! `SQLite`-backed implementation of [`WarehouseSink`].
//!
//! Uses a single `Mutex<Connection>` for thread safety. Batch writes run
//! inside one transaction so a failed batch leaves no partial rows behind.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use granary_types::record::{Columns, Value};
use granary_types::{ColumnType, EnrichedRecord, TableSchema};
use rusqlite::Connection;

use crate::error::{self, SinkError};
use crate::sink::WarehouseSink;

/// `SQLite`-backed warehouse.
///
/// Create with [`SqliteWarehouse::open`] for file-backed persistence or
/// [`SqliteWarehouse::in_memory`] for tests.
pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    /// Open or create a `SQLite` warehouse database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Io`] if the directory can't be created, or a
    /// classified sink error if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| SinkError::from_sqlite(&e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` warehouse (for testing).
    ///
    /// # Errors
    ///
    /// Returns a classified sink error if the in-memory database can't be
    /// initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SinkError::from_sqlite(&e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SinkError::LockPoisoned)
    }

    /// Reject identifiers that would need escaping. Table and column names
    /// come from config and DDL, so `[A-Za-z_][A-Za-z0-9_]*` is the whole
    /// accepted alphabet.
    fn check_identifier(name: &str) -> error::Result<()> {
        let mut chars = name.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Ok(())
        } else {
            Err(SinkError::Fatal(format!("invalid identifier '{name}'")))
        }
    }

    fn sql_type(column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Integer | ColumnType::Bool => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn to_sql_value(value: &Value) -> rusqlite::types::Value {
        match value {
            Value::Null => rusqlite::types::Value::Null,
            Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            Value::Integer(i) => rusqlite::types::Value::Integer(*i),
            Value::Float(f) => rusqlite::types::Value::Real(*f),
            Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        }
    }

    /// Map a stored cell back onto the declared column type.
    fn from_sql_value(raw: rusqlite::types::Value, column_type: ColumnType) -> Value {
        match raw {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(i) => match column_type {
                ColumnType::Bool => Value::Bool(i != 0),
                ColumnType::Float => {
                    #[allow(clippy::cast_precision_loss)]
                    Value::Float(i as f64)
                }
                _ => Value::Integer(i),
            },
            rusqlite::types::Value::Real(f) => Value::Float(f),
            rusqlite::types::Value::Text(s) => Value::Text(s),
            rusqlite::types::Value::Blob(_) => Value::Null,
        }
    }
}

impl WarehouseSink for SqliteWarehouse {
    fn ensure_table(&self, table: &str, schema: &TableSchema) -> error::Result<()> {
        Self::check_identifier(table)?;
        if schema.columns.is_empty() {
            return Err(SinkError::Fatal("schema declares no columns".into()));
        }
        let mut defs = Vec::with_capacity(schema.columns.len());
        for col in &schema.columns {
            Self::check_identifier(&col.name)?;
            defs.push(format!("\"{}\" {}", col.name, Self::sql_type(col.column_type)));
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" ({})",
            defs.join(", ")
        );

        let conn = self.lock_conn()?;
        conn.execute(&ddl, [])
            .map_err(|e| SinkError::from_sqlite(&e))?;
        Ok(())
    }

    fn truncate(&self, table: &str) -> error::Result<()> {
        Self::check_identifier(table)?;
        let conn = self.lock_conn()?;
        conn.execute(&format!("DELETE FROM \"{table}\""), [])
            .map_err(|e| SinkError::from_sqlite(&e))?;
        Ok(())
    }

    fn write_batch(&self, table: &str, records: &[EnrichedRecord]) -> error::Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        Self::check_identifier(table)?;

        // Column order is the union across the batch, sorted; records
        // missing a column write NULL.
        let mut names: Vec<&str> = records
            .iter()
            .flat_map(|r| r.columns.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        for name in &names {
            Self::check_identifier(name)?;
        }

        let quoted: Vec<String> = names.iter().map(|n| format!("\"{n}\"")).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let insert = format!(
            "INSERT INTO \"{table}\" ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );

        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| SinkError::from_sqlite(&e))?;
        let mut written = 0u64;
        {
            let mut stmt = tx.prepare(&insert).map_err(|e| SinkError::from_sqlite(&e))?;
            for record in records {
                let params: Vec<rusqlite::types::Value> = names
                    .iter()
                    .map(|name| {
                        record
                            .get(name)
                            .map_or(rusqlite::types::Value::Null, Self::to_sql_value)
                    })
                    .collect();
                let affected = stmt
                    .execute(rusqlite::params_from_iter(params))
                    .map_err(|e| SinkError::from_sqlite(&e))?;
                written += affected as u64;
            }
        }
        tx.commit().map_err(|e| SinkError::from_sqlite(&e))?;

        Ok(written)
    }

    fn row_count(&self, table: &str) -> error::Result<u64> {
        Self::check_identifier(table)?;
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })
            .map_err(|e| SinkError::from_sqlite(&e))?;
        Ok(count.unsigned_abs())
    }

    fn fetch_all(&self, table: &str, schema: &TableSchema) -> error::Result<Vec<Columns>> {
        Self::check_identifier(table)?;
        let mut quoted = Vec::with_capacity(schema.columns.len());
        for col in &schema.columns {
            Self::check_identifier(&col.name)?;
            quoted.push(format!("\"{}\"", col.name));
        }
        let query = format!(
            "SELECT {} FROM \"{table}\" ORDER BY rowid",
            quoted.join(", ")
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&query)
            .map_err(|e| SinkError::from_sqlite(&e))?;
        let rows = stmt
            .query_map([], |row| {
                let mut columns = Columns::new();
                for (idx, col) in schema.columns.iter().enumerate() {
                    let raw: rusqlite::types::Value = row.get(idx)?;
                    columns.insert(col.name.clone(), Self::from_sql_value(raw, col.column_type));
                }
                Ok(columns)
            })
            .map_err(|e| SinkError::from_sqlite(&e))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| SinkError::from_sqlite(&e))?);
        }
        Ok(out)
    }
}
