use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConvertError;
use crate::value::{BindValue, SqlType, Value};

/// Names the field a converter is reading, for error messages.
#[derive(Debug, Clone, Copy)]
pub struct ConvertContext<'a> {
    pub type_name: &'a str,
    pub field: &'a str,
}

/// Translates a field value to and from its SQL parameters.
///
/// A converter may spread one field over several columns; `parameter_types`
/// fixes how many and in which order. `NULL` never reaches a converter.
pub trait Converter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn parameter_types(&self) -> &[SqlType];

    fn parameter_count(&self) -> usize {
        self.parameter_types().len()
    }

    fn to_database(&self, value: &Value) -> Result<Vec<BindValue>, ConvertError>;

    fn from_database(
        &self,
        values: &[BindValue],
        context: &ConvertContext<'_>,
    ) -> Result<Value, ConvertError>;
}

fn single<'v>(
    values: &'v [BindValue],
    context: &ConvertContext<'_>,
) -> Result<&'v BindValue, ConvertError> {
    match values {
        [value] => Ok(value),
        _ => Err(ConvertError::new(format!(
            "{}.{} expects 1 column, got {}",
            context.type_name,
            context.field,
            values.len()
        ))),
    }
}

/// Passes scalar values through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct IdentityConverter {
    sql_type: SqlType,
}

impl IdentityConverter {
    pub fn new(sql_type: SqlType) -> Self {
        Self { sql_type }
    }
}

impl Converter for IdentityConverter {
    fn name(&self) -> &str {
        "identity"
    }

    fn parameter_types(&self) -> &[SqlType] {
        std::slice::from_ref(&self.sql_type)
    }

    fn to_database(&self, value: &Value) -> Result<Vec<BindValue>, ConvertError> {
        Ok(vec![BindValue::try_from(value)?])
    }

    fn from_database(
        &self,
        values: &[BindValue],
        context: &ConvertContext<'_>,
    ) -> Result<Value, ConvertError> {
        Ok(Value::from_bind(single(values, context)?, self.sql_type)?)
    }
}

/// Stores a field as a JSON document.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn name(&self) -> &str {
        "json"
    }

    fn parameter_types(&self) -> &[SqlType] {
        &[SqlType::Json]
    }

    fn to_database(&self, value: &Value) -> Result<Vec<BindValue>, ConvertError> {
        let document = match value {
            Value::Json(document) => document.clone(),
            Value::Text(text) => serde_json::from_str(text)
                .map_err(|err| ConvertError::with_source("text is not a JSON document", err))?,
            other => {
                return Err(ConvertError::new(format!(
                    "cannot store {} as JSON",
                    other.kind_name()
                )));
            }
        };
        Ok(vec![BindValue::Json(document)])
    }

    fn from_database(
        &self,
        values: &[BindValue],
        context: &ConvertContext<'_>,
    ) -> Result<Value, ConvertError> {
        match single(values, context)? {
            BindValue::Json(document) => Ok(Value::Json(document.clone())),
            BindValue::String(text) => serde_json::from_str(text)
                .map(Value::Json)
                .map_err(|err| {
                    ConvertError::with_source(
                        format!("invalid JSON in {}.{}", context.type_name, context.field),
                        err,
                    )
                }),
            other => Err(ConvertError::new(format!(
                "cannot read JSON from {}",
                other.kind_name()
            ))),
        }
    }
}

/// Converters available to models, by name.
///
/// `json` is always registered; identity converters are created per SQL type.
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            converters: HashMap::new(),
        };
        registry.register(JsonConverter);
        registry
    }

    pub fn register(&mut self, converter: impl Converter + 'static) -> &mut Self {
        self.converters
            .insert(converter.name().to_owned(), Arc::new(converter));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Converter>> {
        self.converters.get(name).cloned()
    }

    pub fn json(&self) -> Arc<dyn Converter> {
        self.get("json").unwrap_or_else(|| Arc::new(JsonConverter))
    }

    pub fn identity(&self, sql_type: SqlType) -> Arc<dyn Converter> {
        Arc::new(IdentityConverter::new(sql_type))
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.converters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ConverterRegistry")
            .field("converters", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    const CONTEXT: ConvertContext<'static> = ConvertContext {
        type_name: "Pet",
        field: "tags",
    };

    #[test]
    fn identity_round_trips_scalars() {
        let converter = IdentityConverter::new(SqlType::Int);
        let binds = converter.to_database(&Value::Int(42)).unwrap();
        assert_eq!(binds, vec![BindValue::I64(42)]);
        assert_eq!(
            converter.from_database(&binds, &CONTEXT).unwrap(),
            Value::Int(42)
        );
    }

    #[test]
    fn identity_rejects_wrong_arity() {
        let converter = IdentityConverter::new(SqlType::Int);
        let err = converter
            .from_database(&[BindValue::I64(1), BindValue::I64(2)], &CONTEXT)
            .unwrap_err();
        assert_eq!(err.message(), "Pet.tags expects 1 column, got 2");
    }

    #[test]
    fn json_reads_text_columns() {
        let value = JsonConverter
            .from_database(&[BindValue::from(r#"{"a":1}"#)], &CONTEXT)
            .unwrap();
        assert_eq!(value, Value::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn json_errors_keep_parser_cause() {
        let err = JsonConverter
            .from_database(&[BindValue::from("{oops")], &CONTEXT)
            .unwrap_err();
        assert_eq!(err.message(), "invalid JSON in Pet.tags");
        assert!(err.source().is_some());
    }

    #[test]
    fn registry_always_knows_json() {
        let registry = ConverterRegistry::default();
        assert_eq!(registry.get("json").unwrap().name(), "json");
        assert!(registry.get("lat_lon").is_none());
    }
}
