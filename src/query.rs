//! Typed query builder over registered record types.
//!
//! [`Query`] accumulates projection, joins, predicates, grouping, ordering
//! and pagination as structured fields, then renders them through a private
//! select plan whose projection can be swapped per terminal: row hydration,
//! `COUNT(*)`, a single aggregate call or a `SELECT 1` probe. Terminals
//! never edit rendered SQL, so `count` on a paged query drops the page by
//! clearing plan fields rather than splicing text.
//!
//! Chain methods consume and return the builder. `Clone` branches a
//! partially built query, and branches never alias: filtering a clone
//! leaves the original untouched.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;

use crate::dialect::{format_placeholders, Dialect};
use crate::error::GantryError;
use crate::expr::{col, Column, Expr, SqlWriter, Subquery};
use crate::relation::{load_related, Relation};
use crate::schema::{FromRow, Schema, SchemaRegistry};
use crate::session::{Row, Session};
use crate::value::{Value, ValueType};

/// Sort direction for one ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn keyword(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// One join clause with its equality pairs already table-qualified.
#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: Option<String>,
    on: Vec<(Column, Column)>,
}

/// Aggregate functions available through [`Query::sum`] and friends.
#[derive(Debug, Clone, Copy)]
enum Agg {
    Sum,
    Avg,
    Min,
    Max,
}

impl Agg {
    fn keyword(self) -> &'static str {
        match self {
            Agg::Sum => "SUM",
            Agg::Avg => "AVG",
            Agg::Min => "MIN",
            Agg::Max => "MAX",
        }
    }
}

/// What the select list contains.
#[derive(Debug, Clone)]
enum Projection {
    /// The schema's column list, or an explicit `select` subset.
    Columns(Vec<Column>),
    /// `COUNT(*)` over the filtered set.
    CountStar,
    /// A single aggregate call over one column.
    Aggregate(Agg, Column),
    /// Constant `1`, probing for row existence.
    Probe,
}

/// A select statement held as typed clauses until render time.
#[derive(Debug, Clone)]
struct SelectPlan {
    projection: Projection,
    table: String,
    joins: Vec<Join>,
    wheres: Vec<Expr>,
    group_by: Vec<Column>,
    having: Vec<Expr>,
    order_by: Vec<(Column, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectPlan {
    /// Render to SQL with `?` argument markers.
    ///
    /// The dialect decides how an OFFSET without a LIMIT is spelled; every
    /// other clause renders the same text on every engine.
    fn render(&self, dialect: &dyn Dialect) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new();
        w.push("SELECT ");
        match &self.projection {
            Projection::Columns(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push(&column.render());
                }
            }
            Projection::CountStar => w.push("COUNT(*)"),
            Projection::Aggregate(func, column) => {
                w.push(func.keyword());
                w.push("(");
                w.push(&column.render());
                w.push(")");
            }
            Projection::Probe => w.push("1"),
        }
        w.push(" FROM ");
        w.push(&self.table);
        for join in &self.joins {
            w.push(" ");
            w.push(join.kind.keyword());
            w.push(" ");
            w.push(&join.table);
            if let Some(alias) = &join.alias {
                w.push(" AS ");
                w.push(alias);
            }
            w.push(" ON ");
            for (i, (left, right)) in join.on.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                w.push(&left.render());
                w.push(" = ");
                w.push(&right.render());
            }
        }
        write_predicates(&mut w, " WHERE ", &self.wheres);
        if !self.group_by.is_empty() {
            w.push(" GROUP BY ");
            for (i, column) in self.group_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push(&column.render());
            }
        }
        write_predicates(&mut w, " HAVING ", &self.having);
        if !self.order_by.is_empty() {
            w.push(" ORDER BY ");
            for (i, (column, direction)) in self.order_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push(&column.render());
                w.push(" ");
                w.push(direction.keyword());
            }
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => w.push(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => w.push(&format!(" LIMIT {limit}")),
            // Engines that reject a bare OFFSET supply a no-limit token
            (None, Some(offset)) => match dialect.unbounded_limit() {
                Some(token) => w.push(&format!(" LIMIT {token} OFFSET {offset}")),
                None => w.push(&format!(" OFFSET {offset}")),
            },
            (None, None) => {}
        }
        w.finish()
    }
}

/// One predicate renders bare, several render parenthesized under `AND`.
fn write_predicates(w: &mut SqlWriter, keyword: &str, exprs: &[Expr]) {
    match exprs {
        [] => {}
        [single] => {
            w.push(keyword);
            single.write_sql(w);
        }
        many => {
            w.push(keyword);
            for (i, expr) in many.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                w.push("(");
                expr.write_sql(w);
                w.push(")");
            }
        }
    }
}

type Preloader<T> = Arc<dyn Fn(&Session, &SchemaRegistry, &mut [T]) -> Result<(), GantryError>>;

/// A chainable, branchable select over a registered record type.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use gantry::{col, Query, SchemaRegistry, SqliteConnection};
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
/// session
///     .execute(
///         "INSERT INTO tasks (title, done) VALUES ('a', 1), ('b', 0)",
///         &[],
///     )
///     .unwrap();
/// let mut registry = SchemaRegistry::new();
/// registry.register(TaskSchema);
/// let registry = Arc::new(registry);
///
/// let open: Vec<Task> = Query::new(&session, &registry)
///     .unwrap()
///     .filter(col("done").eq(false))
///     .asc("title")
///     .all()
///     .unwrap();
/// assert_eq!(open.len(), 1);
/// assert_eq!(open[0].title, "b");
/// ```
pub struct Query<T> {
    session: Session,
    registry: Arc<SchemaRegistry>,
    schema: Arc<dyn Schema<T>>,
    selected: Option<Vec<Column>>,
    joins: Vec<Join>,
    wheres: Vec<Expr>,
    group_by: Vec<Column>,
    having: Vec<Expr>,
    order_by: Vec<(Column, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    preloads: Vec<Preloader<T>>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            registry: Arc::clone(&self.registry),
            schema: Arc::clone(&self.schema),
            selected: self.selected.clone(),
            joins: self.joins.clone(),
            wheres: self.wheres.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            preloads: self.preloads.clone(),
        }
    }
}

impl<T> Query<T> {
    /// Start a query against `T`'s registered table.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotRegistered`] when `T` has no schema in
    /// `registry`.
    pub fn new(session: &Session, registry: &Arc<SchemaRegistry>) -> Result<Self, GantryError>
    where
        T: 'static,
    {
        let schema = registry.get::<T>()?;
        Ok(Self::seeded(
            session.clone(),
            Arc::clone(registry),
            schema,
            Vec::new(),
        ))
    }

    /// Build a query pre-filtered with repository scope predicates.
    pub(crate) fn seeded(
        session: Session,
        registry: Arc<SchemaRegistry>,
        schema: Arc<dyn Schema<T>>,
        scopes: Vec<Expr>,
    ) -> Self {
        Self {
            session,
            registry,
            schema,
            selected: None,
            joins: Vec::new(),
            wheres: scopes,
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            preloads: Vec::new(),
        }
    }

    /// Add a `WHERE` predicate; predicates accumulate under `AND`.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.wheres.push(predicate);
        self
    }

    /// Project a subset of columns instead of the schema's full list.
    ///
    /// Pair with [`Query::scan`] to hydrate into a narrower destination
    /// type. Column names may be `table.column` qualified.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.selected = Some(columns.into_iter().map(|c| col(c.as_ref())).collect());
        self
    }

    /// `INNER JOIN` another table on column equality pairs.
    ///
    /// Each pair is `(base column, joined column)`; unqualified names
    /// default to the base table on the left and the joined table on the
    /// right. With any join present the default projection and bare
    /// predicate columns qualify with the base table name.
    pub fn join(self, table: &str, on: &[(&str, &str)]) -> Self {
        self.push_join(JoinKind::Inner, table, None, on)
    }

    /// `INNER JOIN` under an alias; the right side of each pair defaults
    /// to the alias.
    pub fn join_as(self, table: &str, alias: &str, on: &[(&str, &str)]) -> Self {
        self.push_join(JoinKind::Inner, table, Some(alias), on)
    }

    /// `LEFT JOIN` another table on column equality pairs.
    pub fn left_join(self, table: &str, on: &[(&str, &str)]) -> Self {
        self.push_join(JoinKind::Left, table, None, on)
    }

    /// `LEFT JOIN` under an alias.
    pub fn left_join_as(self, table: &str, alias: &str, on: &[(&str, &str)]) -> Self {
        self.push_join(JoinKind::Left, table, Some(alias), on)
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        table: &str,
        alias: Option<&str>,
        on: &[(&str, &str)],
    ) -> Self {
        let base = self.schema.table().to_string();
        let target = alias.unwrap_or(table);
        let on = on
            .iter()
            .map(|(left, right)| {
                (
                    col(left).default_table(&base),
                    col(right).default_table(target),
                )
            })
            .collect();
        self.joins.push(Join {
            kind,
            table: table.to_string(),
            alias: alias.map(str::to_string),
            on,
        });
        self
    }

    /// Add a `GROUP BY` column.
    pub fn group_by(mut self, column: &str) -> Self {
        self.group_by.push(col(column));
        self
    }

    /// Add a `HAVING` predicate; use [`Expr::raw`] for aggregate conditions.
    pub fn having(mut self, predicate: Expr) -> Self {
        self.having.push(predicate);
        self
    }

    /// Append an ordering term; terms accumulate left to right.
    pub fn order_by(mut self, column: &str, direction: Order) -> Self {
        self.order_by.push((col(column), direction));
        self
    }

    /// Append an ascending ordering term.
    pub fn asc(self, column: &str) -> Self {
        self.order_by(column, Order::Asc)
    }

    /// Append a descending ordering term.
    pub fn desc(self, column: &str) -> Self {
        self.order_by(column, Order::Desc)
    }

    /// Cap the number of returned rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows before returning.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Defer a relation load to run after row hydration.
    ///
    /// Preloads run in registration order against the full result slice;
    /// a failing preload aborts the terminal call with no partial result.
    pub fn preload<C>(mut self, relation: Relation<T, C>) -> Self
    where
        T: 'static,
        C: FromRow + Clone + 'static,
    {
        self.preloads
            .push(Arc::new(move |session, registry, parents| {
                load_related(session, registry, &relation, parents)
            }));
        self
    }

    fn qualifies(&self) -> bool {
        !self.joins.is_empty()
    }

    fn qualify(&self, column: Column) -> Column {
        if self.qualifies() {
            column.default_table(self.schema.table())
        } else {
            column
        }
    }

    fn qualify_expr(&self, expr: Expr) -> Expr {
        if self.qualifies() {
            expr.default_table(self.schema.table())
        } else {
            expr
        }
    }

    fn rows_projection(&self) -> Projection {
        let columns: Vec<Column> = match &self.selected {
            Some(columns) => columns.clone(),
            None => self
                .schema
                .columns()
                .iter()
                .map(|&name| Column::bare(name))
                .collect(),
        };
        Projection::Columns(columns.into_iter().map(|c| self.qualify(c)).collect())
    }

    fn plan(&self, projection: Projection) -> SelectPlan {
        SelectPlan {
            projection,
            table: self.schema.table().to_string(),
            joins: self.joins.clone(),
            wheres: self
                .wheres
                .iter()
                .cloned()
                .map(|e| self.qualify_expr(e))
                .collect(),
            group_by: self
                .group_by
                .iter()
                .cloned()
                .map(|c| self.qualify(c))
                .collect(),
            having: self
                .having
                .iter()
                .cloned()
                .map(|e| self.qualify_expr(e))
                .collect(),
            order_by: self
                .order_by
                .iter()
                .cloned()
                .map(|(c, d)| (self.qualify(c), d))
                .collect(),
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Plan for terminals that summarize the filtered set: ordering and
    /// pagination do not change the answer, so they are dropped.
    fn summary_plan(&self, projection: Projection) -> SelectPlan {
        let mut plan = self.plan(projection);
        plan.order_by.clear();
        plan.limit = None;
        plan.offset = None;
        plan
    }

    fn fetch(&self, plan: &SelectPlan) -> Result<Vec<Row>, GantryError> {
        let (sql, args) = plan.render(self.session.dialect());
        let sql = format_placeholders(&sql, self.session.dialect().placeholder_format());
        self.session.query(&sql, &args)
    }

    /// Render the row-returning statement as the session's dialect will
    /// receive it.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let (sql, args) = self.plan(self.rows_projection()).render(self.session.dialect());
        (
            format_placeholders(&sql, self.session.dialect().placeholder_format()),
            args,
        )
    }

    /// Convert into a parenthesizable subquery for [`Column::in_subquery`].
    ///
    /// Markers stay as `?`; the enclosing statement rewrites placeholders
    /// once, so nested fragments number correctly under numbered dialects.
    pub fn into_subquery(self) -> Subquery {
        let (sql, args) = self.plan(self.rows_projection()).render(self.session.dialect());
        Subquery::new(sql, args)
    }

    /// Execute and hydrate every matching row, then run deferred preloads.
    ///
    /// # Errors
    ///
    /// Driver failures, hydration mismatches and preload failures all abort
    /// the call; no partially preloaded result is returned.
    pub fn all(self) -> Result<Vec<T>, GantryError>
    where
        T: FromRow,
    {
        let rows = self.fetch(&self.plan(self.rows_projection()))?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(T::from_row(row)?);
        }
        for preload in &self.preloads {
            preload(&self.session, &self.registry, &mut records)?;
        }
        Ok(records)
    }

    /// Execute with `LIMIT 1` and return the single row.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotFound`] when nothing matches.
    pub fn one(self) -> Result<T, GantryError>
    where
        T: FromRow,
    {
        let mut records = self.limit(1).all()?;
        if records.is_empty() {
            return Err(GantryError::NotFound);
        }
        Ok(records.swap_remove(0))
    }

    /// The first matching row, with a primary-key tiebreaker appended
    /// after any explicit ordering.
    pub fn first(self) -> Result<T, GantryError>
    where
        T: FromRow,
    {
        self.pk_ordered(Order::Asc).one()
    }

    /// The last matching row by the same ordering rules as [`Query::first`],
    /// reversed.
    pub fn last(self) -> Result<T, GantryError>
    where
        T: FromRow,
    {
        self.pk_ordered(Order::Desc).one()
    }

    fn pk_ordered(mut self, direction: Order) -> Self {
        let pk = self.schema.pk_column().to_string();
        self.order_by.push((Column::bare(pk), direction));
        self
    }

    /// Execute and hydrate into an arbitrary [`FromRow`] destination,
    /// typically a column subset paired with [`Query::select`].
    ///
    /// Preloads registered on this query do not run; they attach to `T`,
    /// not to the scan destination.
    pub fn scan<D>(self) -> Result<Vec<D>, GantryError>
    where
        D: FromRow,
    {
        let rows = self.fetch(&self.plan(self.rows_projection()))?;
        rows.iter().map(D::from_row).collect()
    }

    /// Like [`Query::scan`] limited to one row.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotFound`] when nothing matches.
    pub fn scan_one<D>(self) -> Result<D, GantryError>
    where
        D: FromRow,
    {
        let mut records = self.limit(1).scan()?;
        if records.is_empty() {
            return Err(GantryError::NotFound);
        }
        Ok(records.swap_remove(0))
    }

    /// Number of matching rows, independent of ordering and pagination.
    pub fn count(self) -> Result<u64, GantryError> {
        let rows = self.fetch(&self.summary_plan(Projection::CountStar))?;
        match rows.first() {
            Some(row) => row.try_get::<u64>(0),
            None => Ok(0),
        }
    }

    /// Whether any row matches, probed with `SELECT 1 ... LIMIT 1`.
    pub fn exists(self) -> Result<bool, GantryError> {
        let mut plan = self.summary_plan(Projection::Probe);
        plan.limit = Some(1);
        let rows = self.fetch(&plan)?;
        Ok(!rows.is_empty())
    }

    /// `SUM` over a numeric column; `NULL` over zero rows folds to `0.0`.
    pub fn sum(self, column: &str) -> Result<f64, GantryError> {
        self.fold_numeric(Agg::Sum, column)
    }

    /// `AVG` over a numeric column; `NULL` over zero rows folds to `0.0`.
    pub fn avg(self, column: &str) -> Result<f64, GantryError> {
        self.fold_numeric(Agg::Avg, column)
    }

    fn fold_numeric(self, func: Agg, column: &str) -> Result<f64, GantryError> {
        let target = self.qualify(col(column));
        let rows = self.fetch(&self.summary_plan(Projection::Aggregate(func, target)))?;
        match rows.first().and_then(|row| row.value(0)) {
            Some(value) if value.is_null() => Ok(0.0),
            Some(value) => numeric(value),
            None => Ok(0.0),
        }
    }

    /// Smallest value in a column, `None` when no row matches.
    pub fn min(self, column: &str) -> Result<Option<Value>, GantryError> {
        self.fold_extreme(Agg::Min, column)
    }

    /// Largest value in a column, `None` when no row matches.
    pub fn max(self, column: &str) -> Result<Option<Value>, GantryError> {
        self.fold_extreme(Agg::Max, column)
    }

    fn fold_extreme(self, func: Agg, column: &str) -> Result<Option<Value>, GantryError> {
        let target = self.qualify(col(column));
        let rows = self.fetch(&self.summary_plan(Projection::Aggregate(func, target)))?;
        Ok(rows
            .first()
            .and_then(|row| row.value(0))
            .filter(|value| !value.is_null())
            .cloned())
    }
}

/// Coerce an aggregate cell to `f64`.
///
/// Numeric driver representations widen; text and byte representations are
/// a type mismatch rather than a silent parse.
fn numeric(value: &Value) -> Result<f64, GantryError> {
    match value {
        Value::Decimal(Some(decimal)) => decimal
            .to_f64()
            .ok_or_else(|| GantryError::type_mismatch("f64", "Decimal beyond f64 range")),
        other => f64::from_value(other),
    }
}
