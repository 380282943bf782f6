//! Explicit reflection over record types.
//!
//! A record type describes itself once through [`RecordType::describe`] and
//! exposes its field values by position through [`Record::field`]. Both are
//! usually generated by `#[derive(Record)]`. The positional order is the
//! canonical constructor order used by [`RecordType::construct`].

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::error::{MappingError, ValueError};
use crate::value::{SqlType, Value};

/// Upcasting helpers for record trait objects.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Object-safe view of a record instance.
pub trait Record: AsAny + fmt::Debug {
    /// Handle of the concrete record type.
    fn handle(&self) -> TypeHandle;
    /// Value of the field at `index`, or `None` past the last field.
    fn field(&self, index: usize) -> Option<FieldRef<'_>>;
}

impl dyn Record {
    pub fn downcast_ref<T: Record>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }

    pub fn downcast_arc<T: Record>(self: Arc<Self>) -> Result<Arc<T>, ValueError> {
        self.into_any_arc()
            .downcast::<T>()
            .map_err(|_| ValueError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: "record",
            })
    }
}

/// Static side of a record type.
pub trait RecordType: Record + Sized {
    const NAME: &'static str;

    fn describe() -> RecordDescriptor;

    /// Builds an instance from values in declaration order.
    fn construct(values: Vec<Value>) -> Result<Self, MappingError>;
}

/// Borrowed view of one field value.
#[derive(Debug, Clone)]
pub enum FieldRef<'a> {
    Null,
    Value(Value),
    Record(&'a dyn Record),
    /// Primary-key value held by a lazy reference.
    Ref(&'a Value),
}

impl<'a> FieldRef<'a> {
    pub fn is_null(&self) -> bool {
        match self {
            FieldRef::Null => true,
            FieldRef::Value(value) => value.is_null(),
            FieldRef::Ref(id) => id.is_null(),
            FieldRef::Record(_) => false,
        }
    }

    /// Borrows a value as a field reference, unwrapping nested records.
    pub fn from_value(value: &'a Value) -> FieldRef<'a> {
        match value {
            Value::Null => FieldRef::Null,
            Value::Record(record) => FieldRef::Record(record.as_ref()),
            other => FieldRef::Value(other.clone()),
        }
    }
}

/// Structural equality of two field references.
pub fn field_refs_equal(a: &FieldRef<'_>, b: &FieldRef<'_>) -> bool {
    match (a, b) {
        (FieldRef::Record(x), FieldRef::Record(y)) => records_equal(*x, *y),
        (FieldRef::Ref(x), FieldRef::Ref(y)) => x == y,
        (FieldRef::Value(x), FieldRef::Value(y)) => x == y,
        (x, y) => x.is_null() && y.is_null(),
    }
}

/// Field-by-field equality of two records of the same type.
pub fn records_equal(a: &dyn Record, b: &dyn Record) -> bool {
    if a.handle() != b.handle() {
        return false;
    }
    let mut index = 0;
    loop {
        match (a.field(index), b.field(index)) {
            (None, None) => return true,
            (Some(x), Some(y)) if field_refs_equal(&x, &y) => index += 1,
            _ => return false,
        }
    }
}

/// Cheap, copyable identity of a record type.
#[derive(Clone, Copy)]
pub struct TypeHandle {
    id: TypeId,
    name: &'static str,
    describe: fn() -> RecordDescriptor,
    construct: fn(Vec<Value>) -> Result<Arc<dyn Record>, MappingError>,
}

fn construct_erased<T: RecordType>(values: Vec<Value>) -> Result<Arc<dyn Record>, MappingError> {
    T::construct(values).map(|record| Arc::new(record) as Arc<dyn Record>)
}

impl TypeHandle {
    pub fn of<T: RecordType>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::NAME,
            describe: T::describe,
            construct: construct_erased::<T>,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn describe(&self) -> RecordDescriptor {
        (self.describe)()
    }

    pub fn construct(&self, values: Vec<Value>) -> Result<Arc<dyn Record>, MappingError> {
        (self.construct)(values)
    }

    pub fn is<T: RecordType>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeHandle {}

impl Hash for TypeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Scalar(SqlType),
    Record(TypeHandle),
    /// Lazy reference; keeps the target type of `Ref<T>`.
    Ref(TypeHandle),
}

impl ValueType {
    pub fn target(&self) -> Option<TypeHandle> {
        match self {
            ValueType::Scalar(_) => None,
            ValueType::Record(target) | ValueType::Ref(target) => Some(*target),
        }
    }

    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            ValueType::Scalar(sql_type) => Some(*sql_type),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar(sql_type) => f.write_str(sql_type.name()),
            ValueType::Record(target) => write!(f, "{target}"),
            ValueType::Ref(target) => write!(f, "Ref<{target}>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Maps to its own table.
    Table,
    /// Read-only view over one or more tables.
    Projection,
    /// Embedded into the table of its owner.
    Inline,
}

/// Static description of a record type, in constructor order.
#[derive(Debug, Clone)]
pub struct RecordDescriptor {
    pub name: &'static str,
    pub kind: RecordKind,
    pub annotations: Vec<Annotation>,
    pub fields: Vec<FieldSpec>,
}

impl RecordDescriptor {
    pub fn new(name: &'static str, kind: RecordKind) -> Self {
        Self {
            name,
            kind,
            annotations: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub value_type: ValueType,
    pub nullable: bool,
    pub mutable: bool,
    pub annotations: Vec<Annotation>,
}

impl FieldSpec {
    pub fn of<T: FieldValue>(name: &'static str) -> Self {
        Self {
            name,
            value_type: T::value_type(),
            nullable: T::NULLABLE,
            mutable: true,
            annotations: Vec::new(),
        }
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }
}

/// Rust field types a record may hold.
pub trait FieldValue: Sized {
    const NULLABLE: bool = false;

    fn value_type() -> ValueType;
    fn to_field(&self) -> FieldRef<'_>;
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

fn mismatch(expected: &'static str, found: &Value) -> ValueError {
    if found.is_null() {
        ValueError::UnexpectedNull
    } else {
        ValueError::TypeMismatch {
            expected,
            found: found.kind_name(),
        }
    }
}

impl FieldValue for bool {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Bool)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Bool(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! integer_field {
    ($ty:ty, $sql:expr, $name:literal) => {
        impl FieldValue for $ty {
            fn value_type() -> ValueType {
                ValueType::Scalar($sql)
            }

            fn to_field(&self) -> FieldRef<'_> {
                FieldRef::Value(Value::Int(i64::from(*self)))
            }

            fn from_value(value: Value) -> Result<Self, ValueError> {
                match value {
                    Value::Int(v) => {
                        <$ty>::try_from(v).map_err(|_| ValueError::OutOfRange { target: $name })
                    }
                    other => Err(mismatch($name, &other)),
                }
            }
        }
    };
}

integer_field!(i16, SqlType::SmallInt, "i16");
integer_field!(i32, SqlType::Int, "i32");
integer_field!(i64, SqlType::BigInt, "i64");

impl FieldValue for f64 {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Float)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Float(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            other => Err(mismatch("f64", &other)),
        }
    }
}

impl FieldValue for String {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Text)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Text(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl FieldValue for Uuid {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Uuid)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Uuid(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Uuid(v) => Ok(v),
            other => Err(mismatch("Uuid", &other)),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Timestamp)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Timestamp(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            other => Err(mismatch("DateTime<Utc>", &other)),
        }
    }
}

impl FieldValue for serde_json::Value {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Json)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Json(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Json(v) => Ok(v),
            other => Err(mismatch("serde_json::Value", &other)),
        }
    }
}

impl FieldValue for Vec<u8> {
    fn value_type() -> ValueType {
        ValueType::Scalar(SqlType::Bytes)
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Value(Value::Bytes(self.clone()))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const NULLABLE: bool = true;

    fn value_type() -> ValueType {
        T::value_type()
    }

    fn to_field(&self) -> FieldRef<'_> {
        match self {
            Some(value) => value.to_field(),
            None => FieldRef::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: RecordType> FieldValue for Arc<T> {
    fn value_type() -> ValueType {
        ValueType::Record(TypeHandle::of::<T>())
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Record(self.as_ref())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Record(record) => record.downcast_arc::<T>(),
            other => Err(mismatch(T::NAME, &other)),
        }
    }
}

/// Moves a freshly constructed nested record out of its `Value`.
///
/// Used by by-value record fields; fails when the instance is still shared.
pub fn record_from_value<T: RecordType>(value: Value) -> Result<T, ValueError> {
    let shared = <Arc<T> as FieldValue>::from_value(value)?;
    Arc::try_unwrap(shared).map_err(|_| ValueError::SharedRecord)
}

/// Implements [`FieldValue`] for a record type embedded by value.
#[macro_export]
macro_rules! record_field_value {
    ($ty:ty) => {
        impl $crate::record::FieldValue for $ty {
            fn value_type() -> $crate::record::ValueType {
                $crate::record::ValueType::Record($crate::record::TypeHandle::of::<$ty>())
            }

            fn to_field(&self) -> $crate::record::FieldRef<'_> {
                $crate::record::FieldRef::Record(self)
            }

            fn from_value(
                value: $crate::value::Value,
            ) -> ::core::result::Result<Self, $crate::error::ValueError> {
                $crate::record::record_from_value::<$ty>(value)
            }
        }
    };
}

/// Lazily loaded foreign-key reference.
///
/// Holds the target's primary-key value and, once fetched, the record.
pub struct Ref<T: RecordType> {
    id: Value,
    record: Option<Arc<T>>,
    _target: PhantomData<fn() -> T>,
}

impl<T: RecordType> Ref<T> {
    pub fn new(id: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            record: None,
            _target: PhantomData,
        }
    }

    pub fn loaded(id: impl Into<Value>, record: Arc<T>) -> Self {
        Self {
            id: id.into(),
            record: Some(record),
            _target: PhantomData,
        }
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn get(&self) -> Option<&Arc<T>> {
        self.record.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.record.is_some()
    }
}

impl<T: RecordType> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            record: self.record.clone(),
            _target: PhantomData,
        }
    }
}

impl<T: RecordType> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("target", &T::NAME)
            .field("id", &self.id)
            .field("loaded", &self.record.is_some())
            .finish()
    }
}

impl<T: RecordType> FieldValue for Ref<T> {
    fn value_type() -> ValueType {
        ValueType::Ref(TypeHandle::of::<T>())
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Ref(&self.id)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        if value.is_null() {
            return Err(ValueError::UnexpectedNull);
        }
        Ok(Ref::new(value))
    }
}

/// Consumes constructor values in declaration order.
pub struct ConstructArgs {
    type_name: &'static str,
    values: std::vec::IntoIter<Value>,
}

impl ConstructArgs {
    pub fn new(
        type_name: &'static str,
        values: Vec<Value>,
        expected: usize,
    ) -> Result<Self, MappingError> {
        if values.len() != expected {
            return Err(MappingError::ArgumentCount {
                type_name: type_name.to_owned(),
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            type_name,
            values: values.into_iter(),
        })
    }

    pub fn take<T: FieldValue>(&mut self, field: &'static str) -> Result<T, MappingError> {
        let value = self.values.next().unwrap_or(Value::Null);
        T::from_value(value).map_err(|source| MappingError::Value {
            type_name: self.type_name.to_owned(),
            field: field.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{City, Owner};

    #[test]
    fn handles_compare_by_type() {
        assert_eq!(TypeHandle::of::<City>(), TypeHandle::of::<City>());
        assert_ne!(TypeHandle::of::<City>(), TypeHandle::of::<Owner>());
        assert_eq!(TypeHandle::of::<City>().name(), "City");
    }

    #[test]
    fn optional_fields_are_nullable() {
        assert!(<Option<String> as FieldValue>::NULLABLE);
        assert!(!<String as FieldValue>::NULLABLE);
        assert_eq!(
            <Option<i32> as FieldValue>::value_type(),
            ValueType::Scalar(SqlType::Int)
        );
    }

    #[test]
    fn integers_reject_out_of_range_values() {
        let err = <i16 as FieldValue>::from_value(Value::Int(i64::from(i32::MAX))).unwrap_err();
        assert_eq!(err, ValueError::OutOfRange { target: "i16" });
    }

    #[test]
    fn shared_arc_round_trips_through_value() {
        let city = Arc::new(City::new(7, "Madison"));
        let value = Value::from(city.clone());
        let back = <Arc<City> as FieldValue>::from_value(value).unwrap();
        assert!(Arc::ptr_eq(&city, &back));
    }

    #[test]
    fn by_value_records_need_sole_ownership() {
        let shared = Arc::new(City::new(1, "Monona"));
        let _keep = shared.clone();
        let err = record_from_value::<City>(Value::Record(shared)).unwrap_err();
        assert_eq!(err, ValueError::SharedRecord);
    }

    #[test]
    fn construct_args_check_arity() {
        let err = ConstructArgs::new("City", vec![Value::Int(1)], 2)
            .err()
            .expect("arity error");
        assert!(matches!(
            err,
            MappingError::ArgumentCount {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn structural_equality_walks_fields() {
        let a = City::new(1, "Madison");
        let b = City::new(1, "Madison");
        let c = City::new(1, "Verona");
        assert!(records_equal(&a, &b));
        assert!(!records_equal(&a, &c));
    }
}
