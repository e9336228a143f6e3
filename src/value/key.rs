//! Normalized relation keys.
//!
//! Eager loading groups parents and children by the value of the relation's
//! key columns. The two sides are declared on different record types and may
//! use different integer widths, and drivers widen integers on readback, so
//! grouping on raw [`Value`]s would miss matches that SQL itself would make.
//! [`Key`] folds every integer width into one arm and keeps exact-equality
//! types as themselves, giving a `HashMap`-ready form with the same equality
//! the IN query uses.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::GantryError;
use crate::value::Value;

/// A relation key value in its normalized, hashable form.
///
/// Floats and JSON are rejected: neither has the exact equality a join key
/// needs. A SQL null produces no key at all (`IN` never matches null), which
/// callers represent as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Any integer width, widened losslessly
    Int(i128),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Decimal(Decimal),
}

impl Key {
    /// Normalize a column value into its grouping key.
    ///
    /// Returns `Ok(None)` for SQL nulls.
    ///
    /// # Errors
    ///
    /// Returns a build error when the value's type has no reliable equality
    /// (floats, JSON).
    pub fn from_value(value: &Value) -> Result<Option<Key>, GantryError> {
        if value.is_null() {
            return Ok(None);
        }
        let key = match value {
            Value::TinyInt(Some(v)) => Key::Int(i128::from(*v)),
            Value::SmallInt(Some(v)) => Key::Int(i128::from(*v)),
            Value::Int(Some(v)) => Key::Int(i128::from(*v)),
            Value::BigInt(Some(v)) => Key::Int(i128::from(*v)),
            Value::BigUnsigned(Some(v)) => Key::Int(i128::from(*v)),
            Value::Text(Some(v)) => Key::Text(v.clone()),
            Value::Bytes(Some(v)) => Key::Bytes(v.clone()),
            Value::Bool(Some(v)) => Key::Bool(*v),
            Value::Uuid(Some(v)) => Key::Uuid(*v),
            Value::DateTime(Some(v)) => Key::DateTime(*v),
            Value::Decimal(Some(v)) => Key::Decimal(*v),
            other => {
                return Err(GantryError::build(format!(
                    "{} values cannot be used as relation keys",
                    other.kind()
                )))
            }
        };
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_normalize_to_same_key() {
        let narrow = Key::from_value(&Value::TinyInt(Some(7))).unwrap().unwrap();
        let wide = Key::from_value(&Value::BigInt(Some(7))).unwrap().unwrap();
        let unsigned = Key::from_value(&Value::BigUnsigned(Some(7)))
            .unwrap()
            .unwrap();
        assert_eq!(narrow, wide);
        assert_eq!(wide, unsigned);
        assert_eq!(narrow, Key::Int(7));
    }

    #[test]
    fn test_distinct_integers_stay_distinct() {
        let a = Key::from_value(&Value::BigInt(Some(1))).unwrap().unwrap();
        let b = Key::from_value(&Value::BigInt(Some(2))).unwrap().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_keys_compare_as_themselves() {
        let a = Key::from_value(&Value::Text(Some("alice".to_string())))
            .unwrap()
            .unwrap();
        assert_eq!(a, Key::Text("alice".to_string()));
        // A numeric-looking string is not an integer key
        let numeric_text = Key::from_value(&Value::Text(Some("7".to_string())))
            .unwrap()
            .unwrap();
        assert_ne!(numeric_text, Key::Int(7));
    }

    #[test]
    fn test_null_has_no_key() {
        assert_eq!(Key::from_value(&Value::BigInt(None)).unwrap(), None);
        assert_eq!(Key::from_value(&Value::Text(None)).unwrap(), None);
    }

    #[test]
    fn test_floats_rejected() {
        assert!(Key::from_value(&Value::Double(Some(1.0))).is_err());
        assert!(Key::from_value(&Value::Float(Some(1.0))).is_err());
    }

    #[test]
    fn test_uuid_key() {
        let id = Uuid::new_v4();
        let key = Key::from_value(&Value::Uuid(Some(id))).unwrap().unwrap();
        assert_eq!(key, Key::Uuid(id));
    }

    #[test]
    fn test_keys_usable_in_hash_map() {
        use std::collections::HashMap;
        let mut map: HashMap<Key, u32> = HashMap::new();
        map.insert(Key::Int(1), 10);
        map.insert(Key::Text("1".to_string()), 20);
        assert_eq!(map.get(&Key::Int(1)), Some(&10));
        assert_eq!(map.get(&Key::Text("1".to_string())), Some(&20));
        assert_eq!(map.len(), 2);
    }
}
