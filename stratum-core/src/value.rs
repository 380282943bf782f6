use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::error::ValueError;
use crate::record::{Record, records_equal};

/// Column type used when decoding rows and declaring converter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Float,
    Text,
    Uuid,
    Timestamp,
    Json,
    Bytes,
}

impl SqlType {
    pub fn name(self) -> &'static str {
        match self {
            SqlType::Bool => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Int => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Float => "DOUBLE",
            SqlType::Text => "TEXT",
            SqlType::Uuid => "UUID",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Json => "JSON",
            SqlType::Bytes => "BLOB",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Int | SqlType::BigInt)
    }
}

/// In-memory value of a record field.
///
/// Nested records travel as shared trait objects so that instance identity
/// survives a trip through the mapper.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Record(Arc<dyn Record>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::Json(_) => "json",
            Value::Bytes(_) => "bytes",
            Value::Record(_) => "record",
        }
    }

    pub fn as_record(&self) -> Option<&Arc<dyn Record>> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Interprets a database value as the given column type.
    ///
    /// Drivers without native booleans, UUIDs or timestamps hand those back as
    /// integers or text; this folds them into the expected variant.
    pub fn from_bind(bind: &BindValue, sql_type: SqlType) -> Result<Value, ValueError> {
        let value = match (bind, sql_type) {
            (BindValue::Null, _) => Value::Null,
            (BindValue::Bool(v), SqlType::Bool) => Value::Bool(*v),
            (BindValue::I64(v), SqlType::Bool) => Value::Bool(*v != 0),
            (BindValue::I64(v), t) if t.is_integer() => Value::Int(*v),
            (BindValue::I64(v), SqlType::Float) => Value::Float(*v as f64),
            (BindValue::F64(v), SqlType::Float) => Value::Float(*v),
            (BindValue::String(v), SqlType::Text) => Value::Text(v.clone()),
            (BindValue::Uuid(v), SqlType::Uuid) => Value::Uuid(*v),
            (BindValue::String(v), SqlType::Uuid) => {
                Value::Uuid(Uuid::parse_str(v).map_err(|_| ValueError::Parse {
                    target: "uuid",
                    input: v.clone(),
                })?)
            }
            (BindValue::Bytes(v), SqlType::Uuid) => {
                Value::Uuid(Uuid::from_slice(v).map_err(|_| ValueError::Parse {
                    target: "uuid",
                    input: format!("{} bytes", v.len()),
                })?)
            }
            (BindValue::DateTime(v), SqlType::Timestamp) => Value::Timestamp(*v),
            (BindValue::String(v), SqlType::Timestamp) => Value::Timestamp(parse_timestamp(v)?),
            (BindValue::Json(v), SqlType::Json) => Value::Json(v.clone()),
            (BindValue::String(v), SqlType::Json) => {
                Value::Json(serde_json::from_str(v).map_err(|_| ValueError::Parse {
                    target: "json",
                    input: v.clone(),
                })?)
            }
            (BindValue::Bytes(v), SqlType::Bytes) => Value::Bytes(v.clone()),
            (other, expected) => {
                return Err(ValueError::TypeMismatch {
                    expected: expected.name(),
                    found: other.kind_name(),
                });
            }
        };
        Ok(value)
    }
}

fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, ValueError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ValueError::Parse {
            target: "timestamp",
            input: input.to_owned(),
        })
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => records_equal(a.as_ref(), b.as_ref()),
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    &str => Text,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    serde_json::Value => Json,
    Vec<u8> => Bytes,
}

impl<T: Record> From<Arc<T>> for Value {
    fn from(value: Arc<T>) -> Self {
        Value::Record(value)
    }
}

impl From<Arc<dyn Record>> for Value {
    fn from(value: Arc<dyn Record>) -> Self {
        Value::Record(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Positional value handed to the database driver.
#[derive(Debug, Clone)]
pub enum BindValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Null,
}

impl BindValue {
    pub fn is_null(&self) -> bool {
        matches!(self, BindValue::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            BindValue::String(_) => "text",
            BindValue::I64(_) => "integer",
            BindValue::F64(_) => "float",
            BindValue::Bool(_) => "bool",
            BindValue::Uuid(_) => "uuid",
            BindValue::DateTime(_) => "timestamp",
            BindValue::Json(_) => "json",
            BindValue::Bytes(_) => "bytes",
            BindValue::Null => "NULL",
        }
    }

    pub(crate) fn to_log_string(&self) -> String {
        match self {
            BindValue::String(v) => v.clone(),
            BindValue::I64(v) => v.to_string(),
            BindValue::F64(v) => v.to_string(),
            BindValue::Bool(v) => v.to_string(),
            BindValue::Uuid(v) => v.to_string(),
            BindValue::DateTime(v) => v.to_rfc3339(),
            BindValue::Json(v) => v.to_string(),
            BindValue::Bytes(v) => format!("<{} bytes>", v.len()),
            BindValue::Null => "NULL".to_owned(),
        }
    }
}

// Floats compare by bit pattern so bind values can key the entity cache.
impl PartialEq for BindValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BindValue::String(a), BindValue::String(b)) => a == b,
            (BindValue::I64(a), BindValue::I64(b)) => a == b,
            (BindValue::F64(a), BindValue::F64(b)) => a.to_bits() == b.to_bits(),
            (BindValue::Bool(a), BindValue::Bool(b)) => a == b,
            (BindValue::Uuid(a), BindValue::Uuid(b)) => a == b,
            (BindValue::DateTime(a), BindValue::DateTime(b)) => a == b,
            (BindValue::Json(a), BindValue::Json(b)) => a == b,
            (BindValue::Bytes(a), BindValue::Bytes(b)) => a == b,
            (BindValue::Null, BindValue::Null) => true,
            _ => false,
        }
    }
}

impl Eq for BindValue {}

impl Hash for BindValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            BindValue::String(v) => v.hash(state),
            BindValue::I64(v) => v.hash(state),
            BindValue::F64(v) => v.to_bits().hash(state),
            BindValue::Bool(v) => v.hash(state),
            BindValue::Uuid(v) => v.hash(state),
            BindValue::DateTime(v) => v.hash(state),
            BindValue::Json(v) => v.to_string().hash(state),
            BindValue::Bytes(v) => v.hash(state),
            BindValue::Null => {}
        }
    }
}

impl TryFrom<&Value> for BindValue {
    type Error = ValueError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => BindValue::Null,
            Value::Bool(v) => BindValue::Bool(*v),
            Value::Int(v) => BindValue::I64(*v),
            Value::Float(v) => BindValue::F64(*v),
            Value::Text(v) => BindValue::String(v.clone()),
            Value::Uuid(v) => BindValue::Uuid(*v),
            Value::Timestamp(v) => BindValue::DateTime(*v),
            Value::Json(v) => BindValue::Json(v.clone()),
            Value::Bytes(v) => BindValue::Bytes(v.clone()),
            Value::Record(_) => {
                return Err(ValueError::TypeMismatch {
                    expected: "scalar",
                    found: "record",
                });
            }
        })
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for BindValue {
    fn from(value: i32) -> Self {
        Self::I64(i64::from(value))
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Option<String>> for BindValue {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(v) => Self::String(v),
            None => Self::Null,
        }
    }
}

impl From<Uuid> for BindValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for BindValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_integers_fold_into_booleans() {
        let value = Value::from_bind(&BindValue::I64(1), SqlType::Bool).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn text_timestamps_are_parsed() {
        let value =
            Value::from_bind(&BindValue::from("2024-03-01 10:30:00"), SqlType::Timestamp).unwrap();
        let Value::Timestamp(ts) = value else {
            panic!("expected timestamp");
        };
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:30:00+00:00");
    }

    #[test]
    fn mismatched_bind_reports_both_types() {
        let err = Value::from_bind(&BindValue::Bool(true), SqlType::Uuid).unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: "UUID",
                found: "bool"
            }
        );
    }

    #[test]
    fn float_bind_values_hash_by_bits() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(vec![BindValue::F64(1.5), BindValue::from("a")]);
        assert!(set.contains(&vec![BindValue::F64(1.5), BindValue::from("a")]));
    }

    #[test]
    fn records_cannot_bind_as_scalars() {
        assert!(BindValue::try_from(&Value::Int(3)).is_ok());
        assert!(BindValue::try_from(&Value::Null).unwrap().is_null());
    }

    #[test]
    fn float_equality_agrees_with_hashing() {
        use std::collections::HashSet;
        let nan = BindValue::F64(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_ne!(BindValue::F64(0.0), BindValue::F64(-0.0));

        let mut set = HashSet::new();
        set.insert(nan.clone());
        set.insert(BindValue::F64(0.0));
        assert!(set.contains(&nan));
        assert!(!set.contains(&BindValue::F64(-0.0)));
    }
}
