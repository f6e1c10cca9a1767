//! Value preparation before a value reaches a statement.

use crate::core::{ColumnType, DbError, Result, Value};
use crate::metadata::ColumnMetadata;
use uuid::Uuid;

pub trait Driver: Send + Sync {
    /// Converts `value` into what the database stores for `column`.
    fn prepare_persistent_value(&self, value: Value, column: &ColumnMetadata) -> Result<Value>;
}

/// Checks values against the column type and applies the widening casts
/// [`ColumnType::can_cast_to`] allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDriver;

impl Driver for DefaultDriver {
    fn prepare_persistent_value(&self, value: Value, column: &ColumnMetadata) -> Result<Value> {
        let expected = column.column_type;
        let Some(actual) = ColumnType::of(&value) else {
            return Ok(Value::Null);
        };
        if actual == expected {
            return Ok(value);
        }
        let mismatch = || {
            DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                column.name,
                expected,
                value.type_name()
            ))
        };
        if !actual.can_cast_to(&expected) {
            return Err(mismatch());
        }
        let cast = match (&value, expected) {
            (Value::Integer(i), ColumnType::Float) => Value::Float(*i as f64),
            (Value::Integer(i), ColumnType::Text) => Value::Text(i.to_string()),
            (Value::Float(f), ColumnType::Text) => Value::Text(f.to_string()),
            (Value::Boolean(b), ColumnType::Text) => Value::Text(b.to_string()),
            (Value::Boolean(b), ColumnType::Integer) => Value::Integer(i64::from(*b)),
            (Value::Timestamp(ts), ColumnType::Text) => Value::Text(ts.to_rfc3339()),
            (Value::Uuid(id), ColumnType::Text) => Value::Text(id.to_string()),
            (Value::Text(s), ColumnType::Uuid) => {
                Value::Uuid(Uuid::parse_str(s).map_err(|_| mismatch())?)
            }
            _ => return Err(mismatch()),
        };
        Ok(cast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatible_values_pass_through() {
        let driver = DefaultDriver;
        let title = ColumnMetadata::new("title", ColumnType::Text);
        assert_eq!(
            driver.prepare_persistent_value("a".into(), &title).unwrap(),
            Value::Text("a".into())
        );
        assert_eq!(
            driver.prepare_persistent_value(Value::Null, &title).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_widening_casts() {
        let driver = DefaultDriver;
        let rating = ColumnMetadata::new("rating", ColumnType::Float);
        assert!(matches!(
            driver.prepare_persistent_value(Value::Integer(3), &rating).unwrap(),
            Value::Float(f) if f == 3.0
        ));

        let flag = ColumnMetadata::new("flag", ColumnType::Integer);
        assert_eq!(
            driver.prepare_persistent_value(Value::Boolean(true), &flag).unwrap(),
            Value::Integer(1)
        );

        let id = Uuid::new_v4();
        let external = ColumnMetadata::new("external", ColumnType::Uuid);
        assert_eq!(
            driver
                .prepare_persistent_value(Value::Text(id.to_string()), &external)
                .unwrap(),
            Value::Uuid(id)
        );
    }

    #[test]
    fn test_rejects_incompatible_values() {
        let driver = DefaultDriver;
        let count = ColumnMetadata::new("count", ColumnType::Integer);
        let err = driver
            .prepare_persistent_value(Value::Text("x".into()), &count)
            .unwrap_err();
        assert!(err.to_string().contains("Column 'count' expects type INTEGER, got"));

        let external = ColumnMetadata::new("external", ColumnType::Uuid);
        assert!(driver
            .prepare_persistent_value(Value::Text("not-a-uuid".into()), &external)
            .is_err());
    }
}
