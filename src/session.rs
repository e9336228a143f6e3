//! Session and transaction model.
//!
//! [`Connection`] is the object-safe driver boundary: parameterized execution
//! plus row-returning queries, nothing else. [`Session`] couples a shared
//! connection handle with a [`Dialect`] and tracks whether it is inside a
//! transaction.
//!
//! Transactions are plain statements (`BEGIN`/`COMMIT`/`ROLLBACK`) issued on
//! the shared handle. [`Session::begin`] returns a *new* transactional
//! session; the receiver is never mutated. Nested [`Session::transaction`]
//! calls flatten into the enclosing transaction rather than creating
//! savepoints, so an inner failure rolls back the whole unit of work.
//!
//! A session is not meant for concurrent use: interleaving `begin` with
//! queries from another caller on the same session breaks the sequential
//! executor assumption. Independent sessions over independent connections
//! are fine.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::{DriverError, GantryError, Stage};
use crate::value::{Value, ValueType};

/// Outcome of a non-row statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows touched by INSERT/UPDATE/DELETE; 0 for DDL
    pub rows_affected: u64,
    /// Identifier generated by the last insert on this connection
    pub last_insert_id: i64,
}

/// One result row: shared column names plus owned cell values.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cell at `index`, if present.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Cell under the column named `name`, if the result set has it.
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.values.get(index)
    }

    /// Extract and convert the cell at `index`.
    ///
    /// # Errors
    ///
    /// Returns a type-mismatch error when the index is out of range or the
    /// cell cannot be coerced to `T`.
    pub fn try_get<T: ValueType>(&self, index: usize) -> Result<T, GantryError> {
        match self.value(index) {
            Some(v) => T::from_value(v),
            None => Err(GantryError::type_mismatch(
                T::type_name(),
                format!("no value (row has {} columns, wanted index {index})", self.len()),
            )),
        }
    }

    /// Extract and convert the cell under `name`.
    ///
    /// # Errors
    ///
    /// Returns a type-mismatch error when the column is absent or the cell
    /// cannot be coerced to `T`.
    pub fn try_get_by_name<T: ValueType>(&self, name: &str) -> Result<T, GantryError> {
        match self.value_by_name(name) {
            Some(v) => T::from_value(v),
            None => Err(GantryError::type_mismatch(
                T::type_name(),
                format!("no value (column `{name}` missing)"),
            )),
        }
    }
}

/// Object-safe driver boundary.
///
/// Implementations convert their native errors into [`DriverError`] and their
/// native rows into [`Row`]; everything above this trait is driver-agnostic.
pub trait Connection: Send {
    /// Run a non-row statement with positional arguments.
    fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, DriverError>;

    /// Run a row-returning statement with positional arguments.
    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DriverError>;
}

/// A connection handle bound to a dialect, with transaction state.
///
/// Cloning a session is cheap and shares both the connection and, for
/// transactional sessions, the open/closed state of the transaction.
///
/// # Examples
///
/// ```
/// use gantry::SqliteConnection;
///
/// let session = SqliteConnection::open_in_memory().unwrap().into_session();
/// session.execute("CREATE TABLE t (n INTEGER)", &[]).unwrap();
///
/// let result = session.transaction(|tx| {
///     tx.execute("INSERT INTO t (n) VALUES (?)", &[1i64.into()])?;
///     tx.execute("INSERT INTO t (n) VALUES (?)", &[2i64.into()])?;
///     Ok(())
/// });
/// assert!(result.is_ok());
/// ```
#[derive(Clone)]
pub struct Session {
    conn: Arc<dyn Connection>,
    dialect: Arc<dyn Dialect>,
    tx_open: Option<Rc<Cell<bool>>>,
}

impl Session {
    /// Wrap a connection and dialect as a plain (non-transactional) session.
    pub fn new(conn: Arc<dyn Connection>, dialect: Arc<dyn Dialect>) -> Self {
        Self {
            conn,
            dialect,
            tx_open: None,
        }
    }

    /// The dialect this session renders statements for.
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// True while this session wraps an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.tx_open.as_ref().is_some_and(|flag| flag.get())
    }

    /// Reject operations on a transactional session whose transaction has
    /// already been committed or rolled back.
    fn guard_open(&self) -> Result<(), GantryError> {
        match &self.tx_open {
            Some(flag) if !flag.get() => Err(GantryError::NoActiveTransaction),
            _ => Ok(()),
        }
    }

    /// Run a non-row statement.
    ///
    /// # Errors
    ///
    /// Returns an execution error on driver failure, or
    /// [`GantryError::NoActiveTransaction`] on a closed transactional session.
    pub fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, GantryError> {
        self.guard_open()?;
        log::debug!("exec [{}]: {}", self.dialect.name(), sql);
        self.conn
            .execute(sql, args)
            .map_err(|e| GantryError::execution(Stage::Exec, e))
    }

    /// Run a row-returning statement.
    ///
    /// # Errors
    ///
    /// Returns an execution error on driver failure, or
    /// [`GantryError::NoActiveTransaction`] on a closed transactional session.
    pub fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, GantryError> {
        self.query_tagged(sql, args, Stage::Query)
    }

    /// Row-returning statement with an explicit failure stage, so the batched
    /// relation query reports as `preload` rather than `query`.
    pub(crate) fn query_tagged(
        &self,
        sql: &str,
        args: &[Value],
        stage: Stage,
    ) -> Result<Vec<Row>, GantryError> {
        self.guard_open()?;
        log::debug!("query [{}]: {}", self.dialect.name(), sql);
        self.conn
            .query(sql, args)
            .map_err(|e| GantryError::execution(stage, e))
    }

    /// Run a row-returning statement and keep the first row.
    ///
    /// Extra rows are discarded; use `LIMIT 1` in the statement when the
    /// engine should stop early.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotFound`] when no row matched.
    pub fn query_one(&self, sql: &str, args: &[Value]) -> Result<Row, GantryError> {
        let mut rows = self.query(sql, args)?;
        if rows.is_empty() {
            return Err(GantryError::NotFound);
        }
        Ok(rows.swap_remove(0))
    }

    /// Round-trip `SELECT 1` to check the connection is alive.
    pub fn ping(&self) -> Result<(), GantryError> {
        self.query("SELECT 1", &[]).map(|_| ())
    }

    /// Open a transaction and return a new session wrapping it.
    ///
    /// The receiver is untouched and remains usable as a plain session.
    ///
    /// # Errors
    ///
    /// Returns an execution error when the engine rejects `BEGIN` (including
    /// calling `begin` on a session already inside a transaction, for engines
    /// that do not nest).
    pub fn begin(&self) -> Result<Session, GantryError> {
        self.execute("BEGIN", &[])?;
        Ok(Session {
            conn: Arc::clone(&self.conn),
            dialect: Arc::clone(&self.dialect),
            tx_open: Some(Rc::new(Cell::new(true))),
        })
    }

    /// Commit the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NoActiveTransaction`] on a plain session or a
    /// transaction that was already closed. If the engine rejects `COMMIT`
    /// the transaction is left open so the caller can still roll back.
    pub fn commit(&self) -> Result<(), GantryError> {
        let flag = match &self.tx_open {
            Some(flag) if flag.get() => Rc::clone(flag),
            _ => return Err(GantryError::NoActiveTransaction),
        };
        self.conn
            .execute("COMMIT", &[])
            .map_err(|e| GantryError::execution(Stage::Exec, e))?;
        flag.set(false);
        log::debug!("transaction committed");
        Ok(())
    }

    /// Roll back the open transaction.
    ///
    /// The transaction is considered closed afterwards even when the engine
    /// reports an error; a failed rollback is not retryable.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NoActiveTransaction`] on a plain session or a
    /// transaction that was already closed.
    pub fn rollback(&self) -> Result<(), GantryError> {
        let flag = match &self.tx_open {
            Some(flag) if flag.get() => Rc::clone(flag),
            _ => return Err(GantryError::NoActiveTransaction),
        };
        let result = self
            .conn
            .execute("ROLLBACK", &[])
            .map_err(|e| GantryError::execution(Stage::Exec, e));
        flag.set(false);
        result?;
        log::debug!("transaction rolled back");
        Ok(())
    }

    /// Run `f` inside a transaction.
    ///
    /// If this session is already transactional, `f` runs directly in the
    /// existing transaction (flattened; there are no savepoints, so an error
    /// from `f` will roll back the outer unit of work too). Otherwise a
    /// transaction is opened and:
    ///
    /// - on `Ok`, committed
    /// - on `Err`, rolled back, returning the error
    /// - on panic, rolled back, then the panic resumes
    ///
    /// # Errors
    ///
    /// Returns `f`'s error after rollback, or the commit/begin failure.
    pub fn transaction<R, F>(&self, f: F) -> Result<R, GantryError>
    where
        F: FnOnce(&Session) -> Result<R, GantryError>,
    {
        if self.in_transaction() {
            return f(self);
        }
        let tx = self.begin()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&tx)));
        match outcome {
            Ok(Ok(value)) => {
                tx.commit()?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = tx.rollback() {
                    log::warn!("rollback after error failed: {rollback_err}");
                }
                Err(err)
            }
            Err(payload) => {
                if let Err(rollback_err) = tx.rollback() {
                    log::warn!("rollback after panic failed: {rollback_err}");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}
