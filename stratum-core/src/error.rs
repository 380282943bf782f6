use std::fmt;

use thiserror::Error;

/// Kind of quoted region a scan error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Identifier,
    Literal,
    BlockComment,
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanKind::Identifier => f.write_str("quoted identifier"),
            SpanKind::Literal => f.write_str("string literal"),
            SpanKind::BlockComment => f.write_str("block comment"),
        }
    }
}

/// Raised by the identifier/literal scanner on malformed SQL text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("Unterminated {kind} starting at offset {offset}")]
    Unterminated { kind: SpanKind, offset: usize },
}

/// Raised while building or validating the description of a record type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Record {type_name} has no primary key")]
    MissingPrimaryKey { type_name: String },
    #[error("Record {type_name} declares more than one {annotation} field")]
    Duplicate {
        type_name: String,
        annotation: &'static str,
    },
    #[error("Invalid foreign key {type_name}.{field}: {reason}")]
    InvalidForeignKey {
        type_name: String,
        field: String,
        reason: String,
    },
    #[error("Invalid annotation on {type_name}.{field}: {reason}")]
    InvalidAnnotation {
        type_name: String,
        field: String,
        reason: String,
    },
    #[error("Record {type_name} maps column '{column}' more than once")]
    DuplicateColumn { type_name: String, column: String },
    #[error("Unknown converter '{converter}' on {type_name}.{field}")]
    UnknownConverter {
        type_name: String,
        field: String,
        converter: String,
    },
    #[error("Cyclic record graph detected: {path}; use Ref<T> to break the cycle")]
    Cycle { path: String },
}

/// Raised when a dotted field path cannot be resolved against a record type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Empty field path on type {type_name}")]
    Empty { type_name: String },
    #[error("No field named '{segment}' on type {type_name}")]
    UnknownField { segment: String, type_name: String },
    #[error("Cannot resolve '{segment}': {type_name}.{field} is not a record")]
    NotARecord {
        segment: String,
        type_name: String,
        field: String,
    },
    #[error("Cannot resolve '{segment}': {type_name}.{field} is a lazy reference")]
    ThroughRef {
        segment: String,
        type_name: String,
        field: String,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Raised when a field value cannot be turned into the expected Rust type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("value out of range for {target}")]
    OutOfRange { target: &'static str },
    #[error("unexpected NULL")]
    UnexpectedNull,
    #[error("record instance is shared and cannot be moved into its owner")]
    SharedRecord,
    #[error("cannot parse {target} from '{input}'")]
    Parse { target: &'static str, input: String },
}

/// Failure reported by a [`crate::converter::Converter`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConvertError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ValueError> for ConvertError {
    fn from(err: ValueError) -> Self {
        ConvertError::with_source("value conversion failed", err)
    }
}

/// Raised when a record instance and its ordered column values disagree.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Field {type_name}.{field} is not nullable but holds NULL")]
    NullField { type_name: String, field: String },
    #[error("Converter failed for {type_name}.{field}")]
    Converter {
        type_name: String,
        field: String,
        #[source]
        source: ConvertError,
    },
    #[error("Cannot construct {type_name}.{field}")]
    Value {
        type_name: String,
        field: String,
        #[source]
        source: ValueError,
    },
    #[error("Record {type_name} has no field at position {index}")]
    MissingField { type_name: String, index: usize },
    #[error("Expected a {expected} record, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("Record {type_name} expects {expected} values, got {actual}")]
    ArgumentCount {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Record {type_name} has no primary key to map")]
    NoPrimaryKey { type_name: String },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Raised while compiling a template or binding its arguments.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template has {fragments} fragments for {elements} elements; expected {expected}")]
    Unbalanced {
        fragments: usize,
        elements: usize,
        expected: usize,
    },
    #[error("Malformed SQL in fragment {fragment}")]
    Scan {
        fragment: usize,
        #[source]
        source: ScanError,
    },
    #[error("No table in scope for {type_name}")]
    NoScope { type_name: String },
    #[error("Table {type_name} is not part of this query")]
    UnknownTable { type_name: String },
    #[error("Ambiguous alias for {type_name}: candidates {candidates:?}")]
    AmbiguousAlias {
        type_name: String,
        candidates: Vec<String>,
    },
    #[error("No column matches {path}")]
    UnknownColumn { path: String },
    #[error("{feature} is not supported by the {dialect} dialect")]
    Unsupported {
        feature: String,
        dialect: &'static str,
    },
    #[error("Record {type_name} is read-only and cannot be used in {operation}")]
    ReadOnly {
        type_name: String,
        operation: &'static str,
    },
    #[error("Invalid template: {0}")]
    Invalid(String),
    #[error("Arguments do not match the compiled template: {0}")]
    ArgumentMismatch(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Top-level error for Stratum operations.
#[derive(Debug, Error)]
pub enum StratumError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl StratumError {
    /// True for failures raised by the database rather than by compilation or mapping.
    pub fn is_execution(&self) -> bool {
        matches!(self, StratumError::Sqlx(_))
    }
}

pub type StratumResult<T> = Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn path_error_names_segment_and_type() {
        let err = PathError::UnknownField {
            segment: "addres".to_owned(),
            type_name: "Owner".to_owned(),
        };
        assert_eq!(err.to_string(), "No field named 'addres' on type Owner");
    }

    #[test]
    fn converter_error_keeps_cause() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = MappingError::Converter {
            type_name: "Pet".to_owned(),
            field: "tags".to_owned(),
            source: ConvertError::with_source("invalid JSON", parse),
        };
        let source = err.source().expect("converter error source");
        assert_eq!(source.to_string(), "invalid JSON");
        assert!(source.source().is_some());
    }

    #[test]
    fn scan_errors_surface_as_template_errors() {
        let err: StratumError = TemplateError::Scan {
            fragment: 2,
            source: ScanError::Unterminated {
                kind: SpanKind::Literal,
                offset: 7,
            },
        }
        .into();
        assert!(!err.is_execution());
        assert_eq!(err.to_string(), "Malformed SQL in fragment 2");
    }
}
