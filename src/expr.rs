//! Predicate and clause expressions.
//!
//! [`Expr`] is a small value AST: each node renders to a SQL fragment plus the
//! arguments it binds, always using `?` markers in statement order. Dialect
//! placeholder rewriting happens once on the finished statement (see
//! [`crate::dialect::format_placeholders`]), so expressions never need to know
//! which engine they are rendered for.
//!
//! Degenerate combinators have fixed meanings rather than being errors:
//! an empty `AND` is always true, an empty `OR` always false, an empty `IN`
//! always false (with zero bound arguments), and a single-value `IN`
//! collapses to an equality.
//!
//! ```rust
//! use gantry::expr::col;
//!
//! let filter = col("users.age").gt(18).and(col("status").eq("active"));
//! let (sql, args) = filter.to_sql();
//! assert_eq!(sql, "(users.age > ?) AND (status = ?)");
//! assert_eq!(args.len(), 2);
//! ```

use crate::value::Value;

/// A column reference: optional table (or alias) qualifier plus name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub table: Option<String>,
    pub name: String,
}

impl Column {
    /// An unqualified column.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    /// A column qualified with its table or alias.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Qualify this column with `table` if it is not qualified already.
    pub fn default_table(mut self, table: &str) -> Self {
        if self.table.is_none() {
            self.table = Some(table.to_string());
        }
        self
    }

    pub(crate) fn render(&self) -> String {
        match &self.table {
            Some(t) => format!("{t}.{}", self.name),
            None => self.name.clone(),
        }
    }

    // Comparison constructors. Consuming `self` keeps chains allocation-free
    // and mirrors the builder discipline used across the crate.

    pub fn eq(self, value: impl Into<Value>) -> Expr {
        Expr::Eq(self, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Expr {
        Expr::Neq(self, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Expr {
        Expr::Gt(self, value.into())
    }

    pub fn gte(self, value: impl Into<Value>) -> Expr {
        Expr::Gte(self, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Expr {
        Expr::Lt(self, value.into())
    }

    pub fn lte(self, value: impl Into<Value>) -> Expr {
        Expr::Lte(self, value.into())
    }

    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Like(self, pattern.into())
    }

    pub fn not_like(self, pattern: impl Into<String>) -> Expr {
        Expr::NotLike(self, pattern.into())
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(self)
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(self)
    }

    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In(self, values.into_iter().map(Into::into).collect())
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Expr {
        Expr::Between(self, low.into(), high.into())
    }

    pub fn in_subquery(self, subquery: Subquery) -> Expr {
        Expr::InSubquery(self, subquery)
    }
}

/// Parse a column path: `"users.id"` splits into qualifier and name,
/// `"id"` stays bare.
pub fn col(path: &str) -> Column {
    match path.split_once('.') {
        Some((table, name)) => Column::qualified(table, name),
        None => Column::bare(path),
    }
}

/// A pre-rendered subquery: positional-placeholder SQL plus its arguments.
///
/// Produced by the query builder's `into_subquery`, which renders the
/// builder's own statement so it can be embedded in another query's
/// predicate. Keeping the rendered form here lets the expression layer stay
/// independent of the builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    pub(crate) sql: String,
    pub(crate) args: Vec<Value>,
}

impl Subquery {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// A predicate, rendering to `(sql, args)` with positional `?` markers.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Eq(Column, Value),
    Neq(Column, Value),
    Gt(Column, Value),
    Gte(Column, Value),
    Lt(Column, Value),
    Lte(Column, Value),
    Like(Column, String),
    NotLike(Column, String),
    IsNull(Column),
    IsNotNull(Column),
    In(Column, Vec<Value>),
    Between(Column, Value, Value),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Raw(String, Vec<Value>),
    Exists(Subquery),
    InSubquery(Column, Subquery),
}

impl Expr {
    /// A raw SQL fragment with `?` markers and the arguments they bind.
    ///
    /// The caller owns the correspondence between markers and arguments;
    /// nothing validates the fragment.
    pub fn raw(sql: impl Into<String>, args: Vec<Value>) -> Expr {
        Expr::Raw(sql.into(), args)
    }

    /// `EXISTS (...)` over a rendered subquery.
    pub fn exists(subquery: Subquery) -> Expr {
        Expr::Exists(subquery)
    }

    /// Conjunction of `exprs`. Empty input renders always-true.
    pub fn all(exprs: Vec<Expr>) -> Expr {
        Expr::And(exprs)
    }

    /// Disjunction of `exprs`. Empty input renders always-false.
    pub fn any(exprs: Vec<Expr>) -> Expr {
        Expr::Or(exprs)
    }

    /// Combine with another predicate under AND, flattening nested ANDs.
    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    /// Combine with another predicate under OR, flattening nested ORs.
    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    /// Render standalone into `(sql, args)` with `?` markers.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut w = SqlWriter::new();
        self.write_sql(&mut w);
        w.finish()
    }

    pub(crate) fn write_sql(&self, w: &mut SqlWriter) {
        match self {
            Expr::Eq(c, v) => {
                w.push(&c.render());
                w.push(" = ");
                w.push_arg(v.clone());
            }
            Expr::Neq(c, v) => {
                w.push(&c.render());
                w.push(" <> ");
                w.push_arg(v.clone());
            }
            Expr::Gt(c, v) => {
                w.push(&c.render());
                w.push(" > ");
                w.push_arg(v.clone());
            }
            Expr::Gte(c, v) => {
                w.push(&c.render());
                w.push(" >= ");
                w.push_arg(v.clone());
            }
            Expr::Lt(c, v) => {
                w.push(&c.render());
                w.push(" < ");
                w.push_arg(v.clone());
            }
            Expr::Lte(c, v) => {
                w.push(&c.render());
                w.push(" <= ");
                w.push_arg(v.clone());
            }
            Expr::Like(c, p) => {
                w.push(&c.render());
                w.push(" LIKE ");
                w.push_arg(Value::Text(Some(p.clone())));
            }
            Expr::NotLike(c, p) => {
                w.push(&c.render());
                w.push(" NOT LIKE ");
                w.push_arg(Value::Text(Some(p.clone())));
            }
            Expr::IsNull(c) => {
                w.push(&c.render());
                w.push(" IS NULL");
            }
            Expr::IsNotNull(c) => {
                w.push(&c.render());
                w.push(" IS NOT NULL");
            }
            Expr::In(c, values) => match values.len() {
                // Empty membership can never hold; bind nothing
                0 => w.push("1=0"),
                1 => {
                    w.push(&c.render());
                    w.push(" = ");
                    w.push_arg(values[0].clone());
                }
                _ => {
                    w.push(&c.render());
                    w.push(" IN (");
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            w.push(", ");
                        }
                        w.push_arg(v.clone());
                    }
                    w.push(")");
                }
            },
            Expr::Between(c, low, high) => {
                w.push(&c.render());
                w.push(" BETWEEN ");
                w.push_arg(low.clone());
                w.push(" AND ");
                w.push_arg(high.clone());
            }
            Expr::And(list) => {
                if list.is_empty() {
                    w.push("1=1");
                    return;
                }
                Self::write_joined(list, " AND ", w);
            }
            Expr::Or(list) => {
                if list.is_empty() {
                    w.push("1=0");
                    return;
                }
                Self::write_joined(list, " OR ", w);
            }
            Expr::Not(inner) => {
                w.push("NOT (");
                inner.write_sql(w);
                w.push(")");
            }
            Expr::Raw(sql, args) => {
                w.push(sql);
                w.extend_args(args.iter().cloned());
            }
            Expr::Exists(sub) => {
                w.push("EXISTS (");
                w.push(&sub.sql);
                w.push(")");
                w.extend_args(sub.args.iter().cloned());
            }
            Expr::InSubquery(c, sub) => {
                w.push(&c.render());
                w.push(" IN (");
                w.push(&sub.sql);
                w.push(")");
                w.extend_args(sub.args.iter().cloned());
            }
        }
    }

    fn write_joined(list: &[Expr], sep: &str, w: &mut SqlWriter) {
        for (i, e) in list.iter().enumerate() {
            if i > 0 {
                w.push(sep);
            }
            w.push("(");
            e.write_sql(w);
            w.push(")");
        }
    }

    /// Qualify every bare column in this predicate with `table`.
    ///
    /// Used when a query gains a join and unqualified filter columns would
    /// become ambiguous. Raw fragments and subqueries are left untouched.
    pub(crate) fn default_table(self, table: &str) -> Expr {
        match self {
            Expr::Eq(c, v) => Expr::Eq(c.default_table(table), v),
            Expr::Neq(c, v) => Expr::Neq(c.default_table(table), v),
            Expr::Gt(c, v) => Expr::Gt(c.default_table(table), v),
            Expr::Gte(c, v) => Expr::Gte(c.default_table(table), v),
            Expr::Lt(c, v) => Expr::Lt(c.default_table(table), v),
            Expr::Lte(c, v) => Expr::Lte(c.default_table(table), v),
            Expr::Like(c, p) => Expr::Like(c.default_table(table), p),
            Expr::NotLike(c, p) => Expr::NotLike(c.default_table(table), p),
            Expr::IsNull(c) => Expr::IsNull(c.default_table(table)),
            Expr::IsNotNull(c) => Expr::IsNotNull(c.default_table(table)),
            Expr::In(c, v) => Expr::In(c.default_table(table), v),
            Expr::Between(c, l, h) => Expr::Between(c.default_table(table), l, h),
            Expr::And(list) => {
                Expr::And(list.into_iter().map(|e| e.default_table(table)).collect())
            }
            Expr::Or(list) => Expr::Or(list.into_iter().map(|e| e.default_table(table)).collect()),
            Expr::Not(inner) => Expr::Not(Box::new(inner.default_table(table))),
            Expr::InSubquery(c, sub) => Expr::InSubquery(c.default_table(table), sub),
            other @ (Expr::Raw(..) | Expr::Exists(_)) => other,
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    /// Negate this predicate: `!col("a").eq(1)` renders `NOT (a = ?)`.
    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// Accumulates SQL text and positional arguments in emission order.
#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    args: Vec<Value>,
}

impl SqlWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Write a `?` marker and record its argument.
    pub(crate) fn push_arg(&mut self, value: Value) {
        self.sql.push('?');
        self.args.push(value);
    }

    /// Record arguments for markers already present in pushed text.
    pub(crate) fn extend_args(&mut self, args: impl IntoIterator<Item = Value>) {
        self.args.extend(args);
    }

    pub(crate) fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }
}
