//! Bundled SQLite driver.
//!
//! [`SqliteConnection`] adapts a `rusqlite` connection to the [`Connection`]
//! trait. SQLite has four storage classes, so rich values go in as TEXT
//! (timestamps as RFC 3339, UUIDs, decimals and JSON as their canonical
//! string forms) and every integer comes back as `BigInt`; the typed readers
//! on [`Row`] narrow and parse on the way out.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::params_from_iter;
use rusqlite::types::{ToSqlOutput, Value as StorageValue, ValueRef};

use crate::config::DatabaseConfig;
use crate::dialect::SqliteDialect;
use crate::error::{DriverError, GantryError, Stage};
use crate::session::{Connection, ExecResult, Row, Session};
use crate::value::Value;

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            Value::Bool(Some(b)) => ToSqlOutput::Owned(StorageValue::Integer(i64::from(*b))),
            Value::TinyInt(Some(v)) => ToSqlOutput::Owned(StorageValue::Integer(i64::from(*v))),
            Value::SmallInt(Some(v)) => ToSqlOutput::Owned(StorageValue::Integer(i64::from(*v))),
            Value::Int(Some(v)) => ToSqlOutput::Owned(StorageValue::Integer(i64::from(*v))),
            Value::BigInt(Some(v)) => ToSqlOutput::Owned(StorageValue::Integer(*v)),
            Value::BigUnsigned(Some(v)) => match i64::try_from(*v) {
                Ok(v) => ToSqlOutput::Owned(StorageValue::Integer(v)),
                Err(_) => {
                    return Err(rusqlite::Error::ToSqlConversionFailure(Box::new(
                        DriverError::new(format!("u64 value {v} exceeds SQLite integer range")),
                    )))
                }
            },
            Value::Float(Some(v)) => ToSqlOutput::Owned(StorageValue::Real(f64::from(*v))),
            Value::Double(Some(v)) => ToSqlOutput::Owned(StorageValue::Real(*v)),
            Value::Text(Some(s)) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(Some(b)) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Json(Some(j)) => ToSqlOutput::Owned(StorageValue::Text(j.to_string())),
            Value::Uuid(Some(u)) => ToSqlOutput::Owned(StorageValue::Text(u.to_string())),
            Value::DateTime(Some(dt)) => ToSqlOutput::Owned(StorageValue::Text(dt.to_rfc3339())),
            Value::Decimal(Some(d)) => ToSqlOutput::Owned(StorageValue::Text(d.to_string())),
            // Every null payload, regardless of declared type
            _ => ToSqlOutput::Owned(StorageValue::Null),
        };
        Ok(out)
    }
}

fn map_err(err: rusqlite::Error) -> DriverError {
    DriverError::with_source(err.to_string(), err)
}

fn value_from_storage(cell: StorageValue) -> Value {
    match cell {
        StorageValue::Null => Value::Text(None),
        StorageValue::Integer(i) => Value::BigInt(Some(i)),
        StorageValue::Real(f) => Value::Double(Some(f)),
        StorageValue::Text(s) => Value::Text(Some(s)),
        StorageValue::Blob(b) => Value::Bytes(Some(b)),
    }
}

/// SQLite-backed [`Connection`], embedded via the bundled engine.
///
/// # Examples
///
/// ```
/// use gantry::SqliteConnection;
///
/// let session = SqliteConnection::open_in_memory().unwrap().into_session();
/// session.ping().unwrap();
/// ```
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Open (creating if absent) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an execution error when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GantryError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| GantryError::execution(Stage::Exec, map_err(e)))?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an execution error when the engine cannot be initialized.
    pub fn open_in_memory() -> Result<Self, GantryError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| GantryError::execution(Stage::Exec, map_err(e)))?;
        Ok(Self { conn })
    }

    /// Open the database described by `config`.
    ///
    /// Accepts `:memory:`, `sqlite::memory:`, `sqlite://<path>` or a bare
    /// filesystem path, and applies the configured busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an execution error when the database cannot be opened or the
    /// busy timeout cannot be set.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, GantryError> {
        let url = config.url.as_str();
        let conn = if url == ":memory:" || url == "sqlite::memory:" {
            Self::open_in_memory()?
        } else {
            Self::open(url.strip_prefix("sqlite://").unwrap_or(url))?
        };
        conn.conn
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| GantryError::execution(Stage::Exec, map_err(e)))?;
        log::debug!("opened sqlite database from {url}");
        Ok(conn)
    }

    /// Wrap this connection in a [`Session`] bound to [`SqliteDialect`].
    pub fn into_session(self) -> Session {
        Session::new(Arc::new(self), Arc::new(SqliteDialect))
    }
}

impl Connection for SqliteConnection {
    fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, DriverError> {
        let rows_affected = self
            .conn
            .execute(sql, params_from_iter(args.iter()))
            .map_err(map_err)? as u64;
        Ok(ExecResult {
            rows_affected,
            last_insert_id: self.conn.last_insert_rowid(),
        })
    }

    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut stmt = self.conn.prepare(sql).map_err(map_err)?;
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        let mut rows = stmt
            .query(params_from_iter(args.iter()))
            .map_err(map_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let cell: StorageValue = row.get(index).map_err(map_err)?;
                values.push(value_from_storage(cell));
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }
}
