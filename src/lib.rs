//! # Gantry
//!
//! A small data mapper over SQL engines: typed values, a composable
//! expression and query layer, schema-driven repositories with lifecycle
//! hooks, and batched relation preloading. Statements are rendered once
//! with positional placeholders and reshaped per dialect, so the same
//! query text drives SQLite, MySQL and PostgreSQL.
//!
//! SQLite ships in-tree as the bundled driver; other engines plug in
//! through the [`Connection`] and [`Dialect`] traits.

pub mod config;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod query;
pub mod relation;
pub mod repository;
pub mod schema;
pub mod session;
pub mod sqlite;
pub mod value;

pub use config::DatabaseConfig;
pub use dialect::{Dialect, MysqlDialect, PlaceholderFormat, PostgresDialect, SqliteDialect};
pub use error::{BuildError, DriverError, GantryError, HookError, Stage};
pub use expr::{col, Column, Expr, Subquery};
pub use query::{Order, Query};
pub use relation::{Assign, Relation};
pub use repository::{Hooks, Repository, UpsertOptions};
pub use schema::{FromRow, Schema, SchemaRegistry};
pub use session::{Connection, ExecResult, Row, Session};
pub use sqlite::SqliteConnection;
pub use value::{Key, Value, ValueType};
