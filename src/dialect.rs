//! SQL dialect abstraction.
//!
//! A [`Dialect`] captures the places engine syntax actually diverges for
//! this crate: how positional parameters are written, how an upsert's
//! conflict clause is spelled, and what stands in for "no limit" when a
//! statement pages with OFFSET alone. Everything upstream renders statements
//! with `?` placeholders and a flat argument list; [`format_placeholders`]
//! rewrites the finished statement once for engines that number their
//! parameters.
//!
//! Upsert clauses come in two shapes:
//! - **auto-detect-conflict** ([`MysqlDialect`]): the engine picks the
//!   conflicting unique key itself, so the conflict-column list is ignored.
//!   There is no "do nothing" form; an empty update set yields an empty
//!   (unusable) clause that callers must reject.
//! - **explicit-conflict** ([`PostgresDialect`], [`SqliteDialect`]): the
//!   conflict target is mandatory (empty yields an unusable clause) and an
//!   empty update set renders the engine's DO NOTHING form. The two flavors
//!   differ only in the casing of the excluded-row alias.

/// How a dialect writes positional parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderFormat {
    /// `?` in statement order
    Positional,
    /// `$1`, `$2`, ... numbered left to right
    Numbered,
}

/// Strategy object for engine-specific SQL syntax.
pub trait Dialect: Send + Sync {
    /// Engine name, for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Placeholder style this engine expects.
    fn placeholder_format(&self) -> PlaceholderFormat;

    /// Render the conflict clause appended to an INSERT to make it an upsert.
    ///
    /// Returns the complete clause text including its leading keyword, or an
    /// empty string when the combination of `conflict_columns` and
    /// `update_columns` has no valid rendering for this engine. Callers must
    /// treat an empty clause as a build error rather than executing it.
    fn upsert_clause(
        &self,
        table: &str,
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String;

    /// The literal standing in for "no limit" when a statement pages with
    /// OFFSET alone, or `None` for engines that accept a bare OFFSET clause.
    fn unbounded_limit(&self) -> Option<&'static str>;
}

/// Rewrite `?` placeholders to the dialect's format.
///
/// Statements are always assembled with `?` markers; this pass runs once on
/// the complete statement so nested subquery fragments number correctly.
/// Question marks inside single-quoted literals and double-quoted identifiers
/// are left alone.
pub fn format_placeholders(sql: &str, format: PlaceholderFormat) -> String {
    match format {
        PlaceholderFormat::Positional => sql.to_string(),
        PlaceholderFormat::Numbered => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut n = 0u32;
            let mut in_single = false;
            let mut in_double = false;
            for ch in sql.chars() {
                match ch {
                    '\'' if !in_double => {
                        in_single = !in_single;
                        out.push(ch);
                    }
                    '"' if !in_single => {
                        in_double = !in_double;
                        out.push(ch);
                    }
                    '?' if !in_single && !in_double => {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    }
                    _ => out.push(ch),
                }
            }
            out
        }
    }
}

fn assignment_pairs(update_columns: &[&str], source_alias: &str) -> String {
    update_columns
        .iter()
        .map(|col| format!("{col} = {source_alias}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// MySQL: `?` placeholders, auto-detect-conflict upserts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder_format(&self) -> PlaceholderFormat {
        PlaceholderFormat::Positional
    }

    fn upsert_clause(
        &self,
        _table: &str,
        _conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String {
        if update_columns.is_empty() {
            // MySQL has no DO NOTHING form for ON DUPLICATE KEY
            return String::new();
        }
        let pairs = update_columns
            .iter()
            .map(|col| format!("{col} = VALUES({col})"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ON DUPLICATE KEY UPDATE {pairs}")
    }

    fn unbounded_limit(&self) -> Option<&'static str> {
        // MySQL requires a LIMIT before OFFSET; the manual's idiom for
        // "all rows from this offset" is 2^64 - 1
        Some("18446744073709551615")
    }
}

/// PostgreSQL: `$N` placeholders, explicit-conflict upserts with an
/// uppercase `EXCLUDED` alias.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder_format(&self) -> PlaceholderFormat {
        PlaceholderFormat::Numbered
    }

    fn upsert_clause(
        &self,
        _table: &str,
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String {
        if conflict_columns.is_empty() {
            return String::new();
        }
        let target = conflict_columns.join(", ");
        if update_columns.is_empty() {
            return format!("ON CONFLICT ({target}) DO NOTHING");
        }
        let pairs = assignment_pairs(update_columns, "EXCLUDED");
        format!("ON CONFLICT ({target}) DO UPDATE SET {pairs}")
    }

    fn unbounded_limit(&self) -> Option<&'static str> {
        // OFFSET is legal without LIMIT
        None
    }
}

/// SQLite: `?` placeholders, explicit-conflict upserts with a lowercase
/// `excluded` alias.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder_format(&self) -> PlaceholderFormat {
        PlaceholderFormat::Positional
    }

    fn upsert_clause(
        &self,
        _table: &str,
        conflict_columns: &[&str],
        update_columns: &[&str],
    ) -> String {
        if conflict_columns.is_empty() {
            return String::new();
        }
        let target = conflict_columns.join(", ");
        if update_columns.is_empty() {
            return format!("ON CONFLICT ({target}) DO NOTHING");
        }
        let pairs = assignment_pairs(update_columns, "excluded");
        format!("ON CONFLICT ({target}) DO UPDATE SET {pairs}")
    }

    fn unbounded_limit(&self) -> Option<&'static str> {
        // A negative LIMIT means unbounded
        Some("-1")
    }
}
