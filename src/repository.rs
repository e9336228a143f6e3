//! Record repositories: CRUD, lifecycle hooks and scopes.
//!
//! A [`Repository`] binds a record type's schema to a session and issues the
//! write-side statements (INSERT, UPDATE, DELETE, upsert) plus keyed reads.
//! [`Hooks`] are plain function pointers wrapped around create, update and
//! delete; a failing before-hook aborts the operation before any SQL runs.
//! [`Repository::filter`] derives a scoped repository whose predicates are
//! pinned under every subsequent operation, reads and writes alike, so a
//! tenant- or status-scoped handle cannot reach outside its slice.

use std::fmt;
use std::sync::Arc;

use crate::dialect::format_placeholders;
use crate::error::{GantryError, HookError};
use crate::expr::{Column, Expr, SqlWriter};
use crate::query::Query;
use crate::schema::{FromRow, Schema, SchemaRegistry};
use crate::session::Session;
use crate::value::Value;

/// Lifecycle hooks for a record type.
///
/// Each slot is an optional function pointer; unset slots cost nothing.
/// Hooks receive the record mutably, so a before-create hook can fill
/// defaults and an after-create hook sees the assigned primary key.
pub struct Hooks<T> {
    pub before_create: Option<fn(&mut T) -> Result<(), HookError>>,
    pub after_create: Option<fn(&mut T) -> Result<(), HookError>>,
    pub before_update: Option<fn(&mut T) -> Result<(), HookError>>,
    pub after_update: Option<fn(&mut T) -> Result<(), HookError>>,
    pub before_delete: Option<fn(&mut T) -> Result<(), HookError>>,
    pub after_delete: Option<fn(&mut T) -> Result<(), HookError>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            before_create: None,
            after_create: None,
            before_update: None,
            after_update: None,
            before_delete: None,
            after_delete: None,
        }
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Hooks<T> {}

/// Conflict handling for [`Repository::upsert`].
///
/// `conflict_columns` defaults to the primary key; `update_columns` defaults
/// to every inserted column that is not part of the conflict target.
#[derive(Debug, Clone, Default)]
pub struct UpsertOptions {
    pub conflict_columns: Option<Vec<String>>,
    pub update_columns: Option<Vec<String>>,
}

/// Write-side operations for a registered record type.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use gantry::{Repository, SchemaRegistry, SqliteConnection};
/// # use gantry::{FromRow, GantryError, Row, Schema, Value};
/// # #[derive(Debug, Clone, Default)]
/// # struct Task { id: i64, title: String, done: bool }
/// # struct TaskSchema;
/// # impl Schema<Task> for TaskSchema {
/// #     fn table(&self) -> &str { "tasks" }
/// #     fn columns(&self) -> &[&str] { &["id", "title", "done"] }
/// #     fn insert_row(&self, t: &Task) -> (Vec<&str>, Vec<Value>) {
/// #         (vec!["title", "done"], vec![t.title.clone().into(), t.done.into()])
/// #     }
/// #     fn update_map(&self, t: &Task) -> Vec<(&str, Value)> {
/// #         vec![("title", t.title.clone().into()), ("done", t.done.into())]
/// #     }
/// #     fn primary_key(&self, t: &Task) -> (&str, Value) { ("id", t.id.into()) }
/// #     fn pk_column(&self) -> &str { "id" }
/// #     fn set_primary_key(&self, t: &mut Task, id: i64) { t.id = id; }
/// #     fn auto_increment(&self) -> bool { true }
/// # }
/// # impl FromRow for Task {
/// #     fn from_row(row: &Row) -> Result<Self, GantryError> {
/// #         Ok(Task {
/// #             id: row.try_get_by_name("id")?,
/// #             title: row.try_get_by_name("title")?,
/// #             done: row.try_get_by_name("done")?,
/// #         })
/// #     }
/// # }
///
/// let session = SqliteConnection::open_in_memory().unwrap().into_session();
/// session
///     .execute(
///         "CREATE TABLE tasks (id INTEGER PRIMARY KEY AUTOINCREMENT, \
///          title TEXT NOT NULL, done INTEGER NOT NULL)",
///         &[],
///     )
///     .unwrap();
/// let mut registry = SchemaRegistry::new();
/// registry.register(TaskSchema);
/// let registry = Arc::new(registry);
///
/// let tasks = Repository::<Task>::new(&session, &registry).unwrap();
/// let mut task = Task { title: "write docs".into(), ..Task::default() };
/// tasks.create(&mut task).unwrap();
/// assert!(task.id > 0);
///
/// let reloaded = tasks.find_one(task.id).unwrap();
/// assert_eq!(reloaded.title, "write docs");
/// ```
pub struct Repository<T> {
    session: Session,
    registry: Arc<SchemaRegistry>,
    schema: Arc<dyn Schema<T>>,
    hooks: Hooks<T>,
    scopes: Vec<Expr>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            registry: Arc::clone(&self.registry),
            schema: Arc::clone(&self.schema),
            hooks: self.hooks,
            scopes: self.scopes.clone(),
        }
    }
}

impl<T> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.schema.table())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl<T> Repository<T> {
    /// Build a repository with no hooks.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotRegistered`] when `registry` has no schema
    /// bound for `T`.
    pub fn new(session: &Session, registry: &Arc<SchemaRegistry>) -> Result<Self, GantryError>
    where
        T: 'static,
    {
        Self::with_hooks(session, registry, Hooks::default())
    }

    /// Build a repository with the given lifecycle hooks.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotRegistered`] when `registry` has no schema
    /// bound for `T`.
    pub fn with_hooks(
        session: &Session,
        registry: &Arc<SchemaRegistry>,
        hooks: Hooks<T>,
    ) -> Result<Self, GantryError>
    where
        T: 'static,
    {
        let schema = registry.get::<T>()?;
        Ok(Self {
            session: session.clone(),
            registry: Arc::clone(registry),
            schema,
            hooks,
            scopes: Vec::new(),
        })
    }

    /// Derive a repository with `predicate` pinned under every operation.
    ///
    /// Stacked calls combine under AND. The receiver is unchanged.
    pub fn filter(&self, predicate: Expr) -> Repository<T> {
        let mut scoped = self.clone();
        scoped.scopes.push(predicate);
        scoped
    }

    /// The same repository bound to a different session, typically the
    /// transactional session inside [`Session::transaction`]. Hooks and
    /// scopes carry over.
    pub fn with_session(&self, session: &Session) -> Repository<T> {
        let mut rebound = self.clone();
        rebound.session = session.clone();
        rebound
    }

    /// The session this repository issues statements on.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Start a query seeded with this repository's scopes.
    pub fn query(&self) -> Query<T> {
        Query::seeded(
            self.session.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.schema),
            self.scopes.clone(),
        )
    }

    /// Fetch a single record by primary key, honoring scopes.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotFound`] when no row matches the key within
    /// this repository's scope.
    pub fn find_one(&self, id: impl Into<Value>) -> Result<T, GantryError>
    where
        T: FromRow,
    {
        let pk = self.schema.pk_column().to_string();
        self.query().filter(Column::bare(pk).eq(id)).one()
    }

    /// Insert `record`.
    ///
    /// Runs the create hooks around the statement. When the schema is
    /// auto-increment, the engine-assigned identifier is written back onto
    /// the record before the after-hook runs.
    ///
    /// # Errors
    ///
    /// Returns the hook error when a hook rejects, a build error when the
    /// schema produces no insert columns, or an execution error from the
    /// driver.
    pub fn create(&self, record: &mut T) -> Result<(), GantryError> {
        self.run_hook(self.hooks.before_create, record)?;
        let (columns, values) = self.schema.insert_row(record);
        if columns.is_empty() {
            return Err(GantryError::build("insert produced no columns"));
        }
        let sql = self.insert_sql(&columns);
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        let result = self.session.execute(&sql, &values)?;
        if self.schema.auto_increment() {
            self.schema.set_primary_key(record, result.last_insert_id);
        }
        self.run_hook(self.hooks.after_create, record)?;
        Ok(())
    }

    /// Insert every record in one multi-row statement.
    ///
    /// All before-hooks run first (so every record is validated before any
    /// row is written), then one INSERT, then all after-hooks. Engines
    /// report a single generated identifier per statement, so identifiers
    /// are not written back here; fetch the rows when ids are needed.
    ///
    /// # Errors
    ///
    /// Returns a build error when records disagree on their insert column
    /// sets, which happens when conditional columns (like an omitted
    /// auto-increment key) differ between records.
    pub fn batch_create(&self, records: &mut [T]) -> Result<(), GantryError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records.iter_mut() {
            self.run_hook(self.hooks.before_create, record)?;
        }

        let mut columns: Option<Vec<&str>> = None;
        let mut all_values = Vec::new();
        for record in records.iter() {
            let (cols, values) = self.schema.insert_row(record);
            match &columns {
                None => columns = Some(cols),
                Some(expected) => {
                    if *expected != cols {
                        return Err(GantryError::build(
                            "batch rows must produce identical column sets",
                        ));
                    }
                }
            }
            all_values.extend(values);
        }
        let columns = match columns {
            Some(cols) if !cols.is_empty() => cols,
            _ => return Err(GantryError::build("insert produced no columns")),
        };

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.schema.table(),
            columns.join(", ")
        );
        for i in 0..records.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            sql.push_str(&placeholder_list(columns.len()));
            sql.push(')');
        }
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        self.session.execute(&sql, &all_values)?;

        for record in records.iter_mut() {
            self.run_hook(self.hooks.after_create, record)?;
        }
        Ok(())
    }

    /// Insert `record`, updating the existing row on conflict.
    ///
    /// The conflict target defaults to the primary key and the updated
    /// columns to every inserted column outside the conflict target; both
    /// can be overridden through `options`. Create hooks run around the
    /// statement. The record's key is left untouched: engines do not report
    /// the surviving row's identifier on the update path.
    ///
    /// # Errors
    ///
    /// Returns a build error when the dialect cannot render the requested
    /// conflict handling (for example an empty conflict target, or MySQL
    /// with no update columns).
    pub fn upsert(&self, record: &mut T, options: &UpsertOptions) -> Result<(), GantryError> {
        self.run_hook(self.hooks.before_create, record)?;
        let (columns, values) = self.schema.insert_row(record);
        if columns.is_empty() {
            return Err(GantryError::build("insert produced no columns"));
        }
        let conflict: Vec<&str> = match &options.conflict_columns {
            Some(cols) => cols.iter().map(String::as_str).collect(),
            None => vec![self.schema.pk_column()],
        };
        let update: Vec<&str> = match &options.update_columns {
            Some(cols) => cols.iter().map(String::as_str).collect(),
            None => columns
                .iter()
                .copied()
                .filter(|c| !conflict.contains(c))
                .collect(),
        };
        let clause = self
            .session
            .dialect()
            .upsert_clause(self.schema.table(), &conflict, &update);
        if clause.is_empty() {
            return Err(GantryError::build(format!(
                "dialect {} cannot render this upsert",
                self.session.dialect().name()
            )));
        }
        let sql = format!("{} {}", self.insert_sql(&columns), clause);
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        self.session.execute(&sql, &values)?;
        self.run_hook(self.hooks.after_create, record)?;
        Ok(())
    }

    /// Write `record`'s full update map to its row.
    ///
    /// Update hooks run around the statement regardless of how many rows
    /// matched; the returned count lets callers detect a stale key or an
    /// out-of-scope row.
    ///
    /// # Errors
    ///
    /// Returns a build error when the schema produces no assignments.
    pub fn update(&self, record: &mut T) -> Result<u64, GantryError> {
        self.run_hook(self.hooks.before_update, record)?;
        let assignments = self.schema.update_map(record);
        if assignments.is_empty() {
            return Err(GantryError::build("update produced no assignments"));
        }
        let (pk_column, pk_value) = self.schema.primary_key(record);

        let mut w = SqlWriter::new();
        w.push("UPDATE ");
        w.push(self.schema.table());
        w.push(" SET ");
        for (i, (column, value)) in assignments.into_iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(column);
            w.push(" = ");
            w.push_arg(value);
        }
        w.push(" WHERE ");
        self.scoped_pk_predicate(pk_column, pk_value).write_sql(&mut w);

        let (sql, args) = w.finish();
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        let result = self.session.execute(&sql, &args)?;
        self.run_hook(self.hooks.after_update, record)?;
        Ok(result.rows_affected)
    }

    /// Write just the given column assignments to the row with key `id`.
    ///
    /// No hooks run: this is a keyed column write, not a record lifecycle
    /// event. An empty assignment list is a no-op returning 0.
    pub fn update_columns(
        &self,
        id: impl Into<Value>,
        assignments: &[(&str, Value)],
    ) -> Result<u64, GantryError> {
        if assignments.is_empty() {
            return Ok(0);
        }
        let mut w = SqlWriter::new();
        w.push("UPDATE ");
        w.push(self.schema.table());
        w.push(" SET ");
        for (i, (column, value)) in assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(column);
            w.push(" = ");
            w.push_arg(value.clone());
        }
        w.push(" WHERE ");
        self.scoped_pk_predicate(self.schema.pk_column(), id.into())
            .write_sql(&mut w);

        let (sql, args) = w.finish();
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        let result = self.session.execute(&sql, &args)?;
        Ok(result.rows_affected)
    }

    /// Delete the row with key `id`. No hooks run without a record.
    pub fn delete(&self, id: impl Into<Value>) -> Result<u64, GantryError> {
        let mut w = SqlWriter::new();
        w.push("DELETE FROM ");
        w.push(self.schema.table());
        w.push(" WHERE ");
        self.scoped_pk_predicate(self.schema.pk_column(), id.into())
            .write_sql(&mut w);

        let (sql, args) = w.finish();
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        let result = self.session.execute(&sql, &args)?;
        Ok(result.rows_affected)
    }

    /// Delete `record`'s row, running the delete hooks around the statement.
    pub fn delete_record(&self, record: &mut T) -> Result<u64, GantryError> {
        self.run_hook(self.hooks.before_delete, record)?;
        let (pk_column, pk_value) = self.schema.primary_key(record);

        let mut w = SqlWriter::new();
        w.push("DELETE FROM ");
        w.push(self.schema.table());
        w.push(" WHERE ");
        self.scoped_pk_predicate(pk_column, pk_value).write_sql(&mut w);

        let (sql, args) = w.finish();
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        let result = self.session.execute(&sql, &args)?;
        self.run_hook(self.hooks.after_delete, record)?;
        Ok(result.rows_affected)
    }

    fn run_hook(
        &self,
        hook: Option<fn(&mut T) -> Result<(), HookError>>,
        record: &mut T,
    ) -> Result<(), GantryError> {
        match hook {
            Some(hook) => hook(record).map_err(GantryError::from),
            None => Ok(()),
        }
    }

    /// Primary-key equality ANDed with this repository's scopes.
    fn scoped_pk_predicate(&self, pk_column: &str, pk_value: Value) -> Expr {
        let mut predicate = Column::bare(pk_column).eq(pk_value);
        for scope in &self.scopes {
            predicate = predicate.and(scope.clone());
        }
        predicate
    }

    fn insert_sql(&self, columns: &[&str]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.schema.table(),
            columns.join(", "),
            placeholder_list(columns.len())
        )
    }
}

fn placeholder_list(n: usize) -> String {
    let mut out = String::with_capacity(n.saturating_mul(3));
    for i in 0..n {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}
