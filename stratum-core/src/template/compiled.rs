use std::ops::Range;
use std::sync::Arc;

use crate::dialect::SqlDialect;
use crate::error::{MappingError, TemplateError};
use crate::mapper::ModelMapper;
use crate::model::Field;
use crate::record::{FieldRef, Record, TypeHandle};
use crate::template::shape::Argument;
use crate::value::{BindValue, SqlType, Value};

#[derive(Debug, Clone)]
pub(crate) enum SqlPart {
    Text(String),
    /// Value `offset` of plan entry `entry`, rendered as a literal at bind time.
    Literal { entry: usize, offset: usize },
}

/// How a value argument becomes database values.
#[derive(Debug, Clone)]
pub(crate) enum Encoding {
    Identity,
    /// Through the field's converter; foreign keys take the target's key.
    Field(Arc<Field>),
    /// Primary key of a record of the given type.
    Key(TypeHandle),
}

#[derive(Debug, Clone)]
pub(crate) enum PlanKind {
    Value(Encoding),
    List(Encoding),
    /// Selected model columns of one record, or of each record in order.
    Columns {
        record: TypeHandle,
        columns: Vec<usize>,
    },
    Count,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanEntry {
    pub argument: usize,
    pub kind: PlanKind,
    /// Number of values the entry must produce.
    pub width: usize,
    pub inline: bool,
}

/// Column types of the row produced by the template's `Select`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    pub record: TypeHandle,
    pub types: Vec<SqlType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSource {
    Fragment(usize),
    Element(usize),
}

/// Part of the compiled SQL produced by one top-level fragment or element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source: SegmentSource,
    pub range: Range<usize>,
}

/// SQL text with its ordered values, ready for execution.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<BindValue>,
    pub row: Option<Arc<RowLayout>>,
}

/// Dialect SQL plus the plan that turns template arguments into binds.
#[derive(Debug)]
pub struct CompiledTemplate {
    pub(crate) parts: Vec<SqlPart>,
    pub(crate) sql: String,
    pub(crate) plan: Vec<PlanEntry>,
    pub(crate) arguments: usize,
    pub(crate) row: Option<Arc<RowLayout>>,
    pub(crate) segments: Vec<Segment>,
    pub(crate) dialect: &'static str,
}

fn mismatch(message: String) -> TemplateError {
    TemplateError::ArgumentMismatch(message)
}

impl CompiledTemplate {
    /// SQL text; values rendered inline show as `?`.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn dialect(&self) -> &'static str {
        self.dialect
    }

    pub fn has_literals(&self) -> bool {
        self.plan.iter().any(|entry| entry.inline)
    }

    /// Number of positional values a bound statement carries.
    pub fn parameter_count(&self) -> usize {
        self.plan
            .iter()
            .filter(|entry| !entry.inline)
            .map(|entry| entry.width)
            .sum()
    }

    pub fn argument_count(&self) -> usize {
        self.arguments
    }

    pub fn row(&self) -> Option<&Arc<RowLayout>> {
        self.row.as_ref()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_text(&self, segment: &Segment) -> &str {
        self.sql.get(segment.range.clone()).unwrap_or_default()
    }

    /// Expands `arguments` through the plan into a statement.
    pub fn bind(
        &self,
        arguments: &[Argument],
        mapper: &ModelMapper<'_>,
        dialect: &dyn SqlDialect,
    ) -> Result<Statement, TemplateError> {
        if arguments.len() != self.arguments {
            return Err(mismatch(format!(
                "expected {} arguments, got {}",
                self.arguments,
                arguments.len()
            )));
        }
        if dialect.name() != self.dialect {
            return Err(TemplateError::Invalid(format!(
                "template compiled for {} cannot be bound for {}",
                self.dialect,
                dialect.name()
            )));
        }

        let mut binds = Vec::with_capacity(self.parameter_count());
        let mut literals: Vec<Vec<BindValue>> = vec![Vec::new(); self.plan.len()];
        for (index, entry) in self.plan.iter().enumerate() {
            let argument = arguments
                .get(entry.argument)
                .ok_or_else(|| mismatch(format!("missing argument {}", entry.argument)))?;
            let values = encode(entry, argument, mapper)?;
            if values.len() != entry.width {
                return Err(mismatch(format!(
                    "argument {} produced {} values, expected {}",
                    entry.argument,
                    values.len(),
                    entry.width
                )));
            }
            if entry.inline {
                literals[index] = values;
            } else {
                binds.extend(values);
            }
        }

        let sql = if self.has_literals() {
            let mut sql = String::with_capacity(self.sql.len() + 16);
            for part in &self.parts {
                match part {
                    SqlPart::Text(text) => sql.push_str(text),
                    SqlPart::Literal { entry, offset } => {
                        let value = literals
                            .get(*entry)
                            .and_then(|values| values.get(*offset))
                            .ok_or_else(|| mismatch(format!("no literal for entry {entry}")))?;
                        sql.push_str(&dialect.render_literal(value));
                    }
                }
            }
            sql
        } else {
            self.sql.clone()
        };

        Ok(Statement {
            sql,
            binds,
            row: self.row.clone(),
        })
    }
}

fn encode(
    entry: &PlanEntry,
    argument: &Argument,
    mapper: &ModelMapper<'_>,
) -> Result<Vec<BindValue>, TemplateError> {
    match (&entry.kind, argument) {
        (PlanKind::Value(encoding), Argument::Value(value)) => encode_value(encoding, value, mapper),
        (PlanKind::List(encoding), Argument::List(values)) => {
            let mut out = Vec::with_capacity(entry.width);
            for value in values {
                out.extend(encode_value(encoding, value, mapper)?);
            }
            Ok(out)
        }
        (PlanKind::Columns { record, columns }, Argument::Record(instance)) => {
            encode_columns(*record, columns, instance.as_ref(), mapper)
        }
        (PlanKind::Columns { record, columns }, Argument::Records(instances)) => {
            let mut out = Vec::with_capacity(entry.width);
            for instance in instances {
                out.extend(encode_columns(*record, columns, instance.as_ref(), mapper)?);
            }
            Ok(out)
        }
        (PlanKind::Count, Argument::Count(count)) => i64::try_from(*count)
            .map(|count| vec![BindValue::I64(count)])
            .map_err(|_| mismatch(format!("count {count} does not fit a BIGINT"))),
        (_, other) => Err(mismatch(format!(
            "argument {} has the wrong kind: {other:?}",
            entry.argument
        ))),
    }
}

fn encode_value(
    encoding: &Encoding,
    value: &Value,
    mapper: &ModelMapper<'_>,
) -> Result<Vec<BindValue>, TemplateError> {
    match encoding {
        Encoding::Identity => BindValue::try_from(value)
            .map(|bind| vec![bind])
            .map_err(|err| mismatch(err.to_string())),
        Encoding::Field(field) => {
            let mut out = Vec::with_capacity(field.width());
            mapper.map_field(field, &FieldRef::from_value(value), &mut out)?;
            Ok(out)
        }
        Encoding::Key(handle) => {
            let Value::Record(record) = value else {
                return Err(mismatch(format!(
                    "expected a {} record, found {}",
                    handle.name(),
                    value.kind_name()
                )));
            };
            if record.handle() != *handle {
                return Err(MappingError::TypeMismatch {
                    expected: handle.name().to_owned(),
                    found: record.handle().name().to_owned(),
                }
                .into());
            }
            let model = mapper.registry().get(*handle)?;
            Ok(mapper.map_key(&model, record.as_ref())?)
        }
    }
}

fn encode_columns(
    record: TypeHandle,
    columns: &[usize],
    instance: &dyn Record,
    mapper: &ModelMapper<'_>,
) -> Result<Vec<BindValue>, TemplateError> {
    let model = mapper.registry().get(record)?;
    let all = mapper.map(&model, instance)?;
    columns
        .iter()
        .map(|index| {
            all.get(*index)
                .cloned()
                .ok_or_else(|| mismatch(format!("{} has no column {index}", record.name())))
        })
        .collect()
}
