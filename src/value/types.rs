//! ValueType trait for type-safe value conversions
//!
//! The `ValueType` trait maps Rust types to their corresponding [`Value`]
//! variant. Conversion into a `Value` is total; extraction back out is
//! fallible and reports a [`GantryError::TypeMismatch`] naming the expected
//! Rust type and the actual payload kind.
//!
//! ## Coercion
//!
//! Extraction is deliberately wider than construction. A driver does not
//! always hand back the variant a field was written as: an embedded engine
//! returns every integer column as a 64-bit integer and temporals, UUIDs,
//! decimals, and JSON as text. `from_value` therefore coerces across
//! representations:
//!
//! - integer targets accept any integer variant that fits the target range;
//!   out-of-range payloads are a mismatch, never a wrap
//! - float targets accept both float widths and all integers, rounding to
//!   the nearest representable value (engines with a single float type hand
//!   `f32` columns back as doubles)
//! - `bool` accepts integer `0`/`1`
//! - `DateTime<Utc>`, `Uuid`, `Decimal`, and `serde_json::Value` accept their
//!   canonical text encodings
//!
//! `Option<T>` is blanket-implemented: any null variant extracts as `None`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::GantryError;
use crate::value::Value;

/// Trait for mapping Rust types to their corresponding [`Value`] variant.
///
/// ## Example
///
/// ```rust
/// use gantry::{Value, ValueType};
///
/// let value = 42i32.into_value();
/// assert!(matches!(value, Value::Int(Some(42))));
///
/// let back = i32::from_value(&value).unwrap();
/// assert_eq!(back, 42);
///
/// // Extraction coerces across integer widths
/// let widened = Value::BigInt(Some(42));
/// assert_eq!(i32::from_value(&widened).unwrap(), 42);
/// ```
pub trait ValueType: Sized {
    /// Name used on the `expected` side of type-mismatch errors.
    fn type_name() -> &'static str;

    /// Convert this value into a [`Value`].
    fn into_value(self) -> Value;

    /// Extract this type from a [`Value`], coercing across the
    /// representations drivers hand back.
    ///
    /// Integer narrowing is range-checked; narrowing into a float target
    /// rounds to the nearest representable value.
    ///
    /// # Errors
    ///
    /// Returns [`GantryError::TypeMismatch`] when the payload kind cannot be
    /// converted, including nulls for non-`Option` targets.
    fn from_value(value: &Value) -> Result<Self, GantryError>;

    /// Return the null variant for this type.
    fn null_value() -> Value;
}

fn mismatch<T: ValueType>(value: &Value) -> GantryError {
    GantryError::type_mismatch(T::type_name(), value.kind())
}

/// Widen any integer payload to `i64`, if the value holds one that fits.
fn integer_payload(value: &Value) -> Option<i64> {
    match value {
        Value::TinyInt(Some(v)) => Some(i64::from(*v)),
        Value::SmallInt(Some(v)) => Some(i64::from(*v)),
        Value::Int(Some(v)) => Some(i64::from(*v)),
        Value::BigInt(Some(v)) => Some(*v),
        Value::BigUnsigned(Some(v)) => i64::try_from(*v).ok(),
        _ => None,
    }
}

macro_rules! impl_integer_value_type {
    ($t:ty, $name:literal, $variant:ident, $widen:ty) => {
        impl ValueType for $t {
            fn type_name() -> &'static str {
                $name
            }

            fn into_value(self) -> Value {
                Value::$variant(Some(self as $widen))
            }

            fn from_value(value: &Value) -> Result<Self, GantryError> {
                integer_payload(value)
                    .and_then(|v| <$t>::try_from(v).ok())
                    .ok_or_else(|| mismatch::<$t>(value))
            }

            fn null_value() -> Value {
                Value::$variant(None)
            }
        }
    };
}

impl_integer_value_type!(i8, "i8", TinyInt, i8);
impl_integer_value_type!(i16, "i16", SmallInt, i16);
impl_integer_value_type!(i32, "i32", Int, i32);
impl_integer_value_type!(i64, "i64", BigInt, i64);
// Unsigned widths widen into the next signed variant, like the write path of
// typical wire encodings; u64 keeps its own variant to stay lossless.
impl_integer_value_type!(u8, "u8", SmallInt, i16);
impl_integer_value_type!(u16, "u16", Int, i32);
impl_integer_value_type!(u32, "u32", BigInt, i64);

impl ValueType for u64 {
    fn type_name() -> &'static str {
        "u64"
    }

    fn into_value(self) -> Value {
        Value::BigUnsigned(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::BigUnsigned(Some(v)) => Ok(*v),
            _ => integer_payload(value)
                .and_then(|v| u64::try_from(v).ok())
                .ok_or_else(|| mismatch::<u64>(value)),
        }
    }

    fn null_value() -> Value {
        Value::BigUnsigned(None)
    }
}

impl ValueType for f32 {
    fn type_name() -> &'static str {
        "f32"
    }

    fn into_value(self) -> Value {
        Value::Float(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Float(Some(v)) => Ok(*v),
            Value::Double(Some(v)) => Ok(*v as f32),
            _ => integer_payload(value)
                .map(|v| v as f32)
                .ok_or_else(|| mismatch::<f32>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Float(None)
    }
}

impl ValueType for f64 {
    fn type_name() -> &'static str {
        "f64"
    }

    fn into_value(self) -> Value {
        Value::Double(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Double(Some(v)) => Ok(*v),
            Value::Float(Some(v)) => Ok(f64::from(*v)),
            _ => integer_payload(value)
                .map(|v| v as f64)
                .ok_or_else(|| mismatch::<f64>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Double(None)
    }
}

impl ValueType for bool {
    fn type_name() -> &'static str {
        "bool"
    }

    fn into_value(self) -> Value {
        Value::Bool(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Bool(Some(v)) => Ok(*v),
            // Engines without a boolean type store 0/1 integers
            _ => match integer_payload(value) {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(mismatch::<bool>(value)),
            },
        }
    }

    fn null_value() -> Value {
        Value::Bool(None)
    }
}

impl ValueType for String {
    fn type_name() -> &'static str {
        "String"
    }

    fn into_value(self) -> Value {
        Value::Text(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Text(Some(v)) => Ok(v.clone()),
            _ => Err(mismatch::<String>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Text(None)
    }
}

impl ValueType for Vec<u8> {
    fn type_name() -> &'static str {
        "Vec<u8>"
    }

    fn into_value(self) -> Value {
        Value::Bytes(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Bytes(Some(v)) => Ok(v.clone()),
            _ => Err(mismatch::<Vec<u8>>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Bytes(None)
    }
}

impl ValueType for serde_json::Value {
    fn type_name() -> &'static str {
        "serde_json::Value"
    }

    fn into_value(self) -> Value {
        Value::Json(Some(Box::new(self)))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Json(Some(v)) => Ok((**v).clone()),
            Value::Text(Some(s)) => serde_json::from_str(s)
                .map_err(|_| GantryError::type_mismatch(Self::type_name(), "Text (not valid JSON)")),
            _ => Err(mismatch::<serde_json::Value>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Json(None)
    }
}

impl ValueType for Uuid {
    fn type_name() -> &'static str {
        "Uuid"
    }

    fn into_value(self) -> Value {
        Value::Uuid(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Uuid(Some(v)) => Ok(*v),
            Value::Text(Some(s)) => Uuid::parse_str(s)
                .map_err(|_| GantryError::type_mismatch(Self::type_name(), "Text (not a UUID)")),
            _ => Err(mismatch::<Uuid>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Uuid(None)
    }
}

impl ValueType for DateTime<Utc> {
    fn type_name() -> &'static str {
        "DateTime<Utc>"
    }

    fn into_value(self) -> Value {
        Value::DateTime(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::DateTime(Some(v)) => Ok(*v),
            Value::Text(Some(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    GantryError::type_mismatch(Self::type_name(), "Text (not an RFC 3339 timestamp)")
                }),
            _ => Err(mismatch::<DateTime<Utc>>(value)),
        }
    }

    fn null_value() -> Value {
        Value::DateTime(None)
    }
}

impl ValueType for Decimal {
    fn type_name() -> &'static str {
        "Decimal"
    }

    fn into_value(self) -> Value {
        Value::Decimal(Some(self))
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        match value {
            Value::Decimal(Some(v)) => Ok(*v),
            Value::Text(Some(s)) => s
                .parse::<Decimal>()
                .map_err(|_| GantryError::type_mismatch(Self::type_name(), "Text (not a decimal)")),
            _ => integer_payload(value)
                .map(Decimal::from)
                .ok_or_else(|| mismatch::<Decimal>(value)),
        }
    }

    fn null_value() -> Value {
        Value::Decimal(None)
    }
}

impl<T: ValueType> ValueType for Option<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn into_value(self) -> Value {
        match self {
            Some(v) => T::into_value(v),
            None => T::null_value(),
        }
    }

    fn from_value(value: &Value) -> Result<Self, GantryError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }

    fn null_value() -> Value {
        T::null_value()
    }
}

// From impls let expression constructors accept plain Rust values:
// `col("age").gt(18)` instead of `col("age").gt(Value::Int(Some(18)))`.

macro_rules! impl_from_for_value {
    ($($t:ty),+ $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    v.into_value()
                }
            }
        )+
    };
}

impl_from_for_value!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    Vec<u8>,
    serde_json::Value,
    Uuid,
    DateTime<Utc>,
    Decimal,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Some(v.to_string()))
    }
}

impl<T: ValueType> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.into_value()
    }
}
