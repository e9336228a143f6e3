//! Crate-owned SQL value representation.
//!
//! [`Value`] is the single type that crosses the driver boundary in both
//! directions: expression arguments are collected as `Value`s and bound
//! positionally, and result cells come back as `Value`s before hydration.
//! Every variant carries an `Option` payload so a null stays typed wherever
//! the producing side knows the column type.
//!
//! ## Traits
//!
//! - **`ValueType`** - Maps Rust field types onto `Value` variants and back,
//!   coercing across the representations real drivers produce (an embedded
//!   engine widens every integer to 64 bits and stores temporals, UUIDs,
//!   decimals, and JSON as text)
//! - **`Key`** - The normalized form used to group relation rows during
//!   eager loading

pub mod key;
pub mod types;

pub use key::Key;
pub use types::ValueType;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A SQL value with a typed null for every variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(Option<bool>),
    TinyInt(Option<i8>),
    SmallInt(Option<i16>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    BigUnsigned(Option<u64>),
    Float(Option<f32>),
    Double(Option<f64>),
    Text(Option<String>),
    Bytes(Option<Vec<u8>>),
    Json(Option<Box<serde_json::Value>>),
    Uuid(Option<Uuid>),
    DateTime(Option<DateTime<Utc>>),
    Decimal(Option<Decimal>),
}

impl Value {
    /// True when the payload is absent, whatever the variant.
    pub fn is_null(&self) -> bool {
        match self {
            Value::Bool(v) => v.is_none(),
            Value::TinyInt(v) => v.is_none(),
            Value::SmallInt(v) => v.is_none(),
            Value::Int(v) => v.is_none(),
            Value::BigInt(v) => v.is_none(),
            Value::BigUnsigned(v) => v.is_none(),
            Value::Float(v) => v.is_none(),
            Value::Double(v) => v.is_none(),
            Value::Text(v) => v.is_none(),
            Value::Bytes(v) => v.is_none(),
            Value::Json(v) => v.is_none(),
            Value::Uuid(v) => v.is_none(),
            Value::DateTime(v) => v.is_none(),
            Value::Decimal(v) => v.is_none(),
        }
    }

    /// Short name describing what this value holds, used in error messages.
    ///
    /// Nulls report as `"Null"` regardless of variant: the variant of a null
    /// depends on which side produced it and is not meaningful to callers.
    pub fn kind(&self) -> &'static str {
        if self.is_null() {
            return "Null";
        }
        match self {
            Value::Bool(_) => "Bool",
            Value::TinyInt(_) => "TinyInt",
            Value::SmallInt(_) => "SmallInt",
            Value::Int(_) => "Int",
            Value::BigInt(_) => "BigInt",
            Value::BigUnsigned(_) => "BigUnsigned",
            Value::Float(_) => "Float",
            Value::Double(_) => "Double",
            Value::Text(_) => "Text",
            Value::Bytes(_) => "Bytes",
            Value::Json(_) => "Json",
            Value::Uuid(_) => "Uuid",
            Value::DateTime(_) => "DateTime",
            Value::Decimal(_) => "Decimal",
        }
    }

    /// True when the payload is an integer of any width.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Value::TinyInt(Some(_))
                | Value::SmallInt(Some(_))
                | Value::Int(Some(_))
                | Value::BigInt(Some(_))
                | Value::BigUnsigned(Some(_))
        )
    }
}
