//! Schema contract and registry.
//!
//! A [`Schema`] maps a record type onto its table: name, ordered column list,
//! insert/update row producers, and primary-key access. Implementations are
//! typically emitted by an external generator, but any object satisfying the
//! contract works; the integration tests use hand-written schemas.
//!
//! [`SchemaRegistry`] binds exactly one schema per record type. It is an
//! ordinary value populated at startup and passed into repository factories,
//! so wiring stays explicit and lookup misses are typed errors. The
//! [`SchemaRegistry::expect`] variant panics instead, for callers that treat
//! a missing registration as a programming error.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::GantryError;
use crate::session::Row;
use crate::value::Value;

/// Capability bundle mapping a record type `T` to its table.
pub trait Schema<T>: Send + Sync {
    /// Table name.
    fn table(&self) -> &str;

    /// Ordered select-column list, the default projection for queries.
    fn columns(&self) -> &[&str];

    /// Produce the insert columns and values for `record`.
    ///
    /// An auto-increment primary key still at its zero value must be omitted
    /// so the engine assigns one.
    fn insert_row(&self, record: &T) -> (Vec<&str>, Vec<Value>);

    /// Produce the full-record update assignments, excluding the primary key.
    fn update_map(&self, record: &T) -> Vec<(&str, Value)>;

    /// Extract the primary key as a `(column, value)` pair.
    fn primary_key(&self, record: &T) -> (&str, Value);

    /// The primary-key column name, available without a record instance.
    fn pk_column(&self) -> &str;

    /// Write a generated identifier back onto the record after insert.
    fn set_primary_key(&self, record: &mut T, id: i64);

    /// Whether the primary key is engine-assigned on insert.
    fn auto_increment(&self) -> bool;
}

impl<T> fmt::Debug for dyn Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("table", &self.table())
            .finish_non_exhaustive()
    }
}

/// Hydration from a result row.
///
/// Implementations read cells by column name, so they stay correct under
/// both the schema's default projection and explicit column subsets.
pub trait FromRow: Sized {
    /// Build a value from `row`.
    ///
    /// # Errors
    ///
    /// Returns a type-mismatch error when a required column is absent or a
    /// cell cannot be coerced to the field's type.
    fn from_row(row: &Row) -> Result<Self, GantryError>;
}

struct Entry {
    schema: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
    table: String,
}

/// Binds record types to their schemas.
///
/// # Examples
///
/// ```
/// use gantry::SchemaRegistry;
/// # use gantry::{Schema, Value};
/// # struct User { id: i64 }
/// # struct UserSchema;
/// # impl Schema<User> for UserSchema {
/// #     fn table(&self) -> &str { "users" }
/// #     fn columns(&self) -> &[&str] { &["id"] }
/// #     fn insert_row(&self, u: &User) -> (Vec<&str>, Vec<Value>) {
/// #         (vec!["id"], vec![u.id.into()])
/// #     }
/// #     fn update_map(&self, _: &User) -> Vec<(&str, Value)> { vec![] }
/// #     fn primary_key(&self, u: &User) -> (&str, Value) { ("id", u.id.into()) }
/// #     fn pk_column(&self) -> &str { "id" }
/// #     fn set_primary_key(&self, u: &mut User, id: i64) { u.id = id; }
/// #     fn auto_increment(&self) -> bool { true }
/// # }
/// let mut registry = SchemaRegistry::new();
/// registry.register(UserSchema);
/// assert!(registry.contains::<User>());
/// let schema = registry.get::<User>().unwrap();
/// assert_eq!(schema.table(), "users");
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    entries: HashMap<TypeId, Entry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `schema` to record type `T`.
    ///
    /// Registering a second schema for the same type replaces the first.
    pub fn register<T, S>(&mut self, schema: S)
    where
        T: 'static,
        S: Schema<T> + 'static,
    {
        let table = schema.table().to_string();
        let schema: Arc<dyn Schema<T>> = Arc::new(schema);
        self.entries.insert(
            TypeId::of::<T>(),
            Entry {
                schema: Box::new(schema),
                type_name: std::any::type_name::<T>(),
                table,
            },
        );
    }

    /// Look up the schema bound to `T`.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::NotRegistered`] when no schema is bound.
    pub fn get<T: 'static>(&self) -> Result<Arc<dyn Schema<T>>, GantryError> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.schema.downcast_ref::<Arc<dyn Schema<T>>>())
            .cloned()
            .ok_or(GantryError::NotRegistered {
                type_name: std::any::type_name::<T>(),
            })
    }

    /// Look up the schema bound to `T`, panicking when absent.
    ///
    /// # Panics
    ///
    /// Panics with the record type's name when no schema is registered. Use
    /// [`SchemaRegistry::get`] where a missing registration is recoverable.
    pub fn expect<T: 'static>(&self) -> Arc<dyn Schema<T>> {
        match self.get::<T>() {
            Ok(schema) => schema,
            Err(_) => panic!(
                "no schema registered for type {}; call SchemaRegistry::register before use",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Whether a schema is bound to `T`.
    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered table names, sorted for stable iteration.
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self.entries.values().map(|e| e.table.as_str()).collect();
        tables.sort_unstable();
        tables
    }

    /// Registered record type names, sorted for stable iteration.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }
}
