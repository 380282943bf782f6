//! Value-free signatures of templates.
//!
//! [`TemplateShape::split`] separates a template into its shape, which keys
//! the compiled-template cache, and the ordered argument list that a
//! compiled template binds. Both walks visit elements depth-first with join
//! conditions and subqueries expanded in place, so argument positions agree
//! with the compiler's binding plan.

use std::sync::Arc;

use crate::dialect::LockMode;
use crate::record::{Record, TypeHandle};
use crate::template::{Element, FieldPath, JoinKind, Operator, Template};
use crate::value::Value;

/// What the compiler may see of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueShape {
    Null,
    Scalar,
    Record(TypeHandle),
}

impl ValueShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueShape::Null,
            Value::Record(record) => ValueShape::Record(record.handle()),
            _ => ValueShape::Scalar,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementShape {
    Select(TypeHandle),
    From {
        record: TypeHandle,
        alias: Option<String>,
        auto_join: bool,
    },
    Join {
        kind: JoinKind,
        record: TypeHandle,
        alias: Option<String>,
        on: TemplateShape,
    },
    Table {
        record: TypeHandle,
        alias: Option<String>,
    },
    Alias(TypeHandle),
    Column(FieldPath),
    Param(ValueShape),
    Inline(ValueShape),
    Compare {
        path: FieldPath,
        op: Operator,
        value: ValueShape,
    },
    In {
        path: FieldPath,
        count: usize,
    },
    Insert(TypeHandle),
    Values(Vec<TypeHandle>),
    Update {
        record: TypeHandle,
        alias: Option<String>,
    },
    Set(TypeHandle),
    Match(TypeHandle),
    Delete {
        record: TypeHandle,
        alias: Option<String>,
    },
    Subquery(TemplateShape),
    Limit,
    Offset,
    Lock(LockMode),
    NextValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateShape {
    pub fragments: Vec<String>,
    pub elements: Vec<ElementShape>,
}

/// Cache key of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub shape: TemplateShape,
    pub dialect: &'static str,
    pub inline_parameters: bool,
}

/// Value carried by a template, in binding-plan order.
#[derive(Debug, Clone)]
pub enum Argument {
    Value(Value),
    List(Vec<Value>),
    Record(Arc<dyn Record>),
    Records(Vec<Arc<dyn Record>>),
    Count(u64),
}

impl TemplateShape {
    pub fn of(template: &Template) -> Self {
        Self::split(template).0
    }

    /// Shape of `template` plus its arguments in binding order.
    pub fn split(template: &Template) -> (Self, Vec<Argument>) {
        let mut arguments = Vec::new();
        let shape = walk(template, &mut arguments);
        (shape, arguments)
    }
}

fn walk(template: &Template, arguments: &mut Vec<Argument>) -> TemplateShape {
    let elements = template
        .elements()
        .iter()
        .map(|element| element_shape(element, arguments))
        .collect();
    TemplateShape {
        fragments: template.fragments().to_vec(),
        elements,
    }
}

fn element_shape(element: &Element, arguments: &mut Vec<Argument>) -> ElementShape {
    match element {
        Element::Select(record) => ElementShape::Select(*record),
        Element::From {
            record,
            alias,
            auto_join,
        } => ElementShape::From {
            record: *record,
            alias: alias.clone(),
            auto_join: *auto_join,
        },
        Element::Join {
            kind,
            record,
            alias,
            on,
        } => ElementShape::Join {
            kind: *kind,
            record: *record,
            alias: alias.clone(),
            on: walk(on, arguments),
        },
        Element::Table { record, alias } => ElementShape::Table {
            record: *record,
            alias: alias.clone(),
        },
        Element::Alias(record) => ElementShape::Alias(*record),
        Element::Column(path) => ElementShape::Column(path.clone()),
        Element::Param(value) => {
            arguments.push(Argument::Value(value.clone()));
            ElementShape::Param(ValueShape::of(value))
        }
        Element::Inline(value) => {
            arguments.push(Argument::Value(value.clone()));
            ElementShape::Inline(ValueShape::of(value))
        }
        Element::Compare { path, op, value } => {
            arguments.push(Argument::Value(value.clone()));
            ElementShape::Compare {
                path: path.clone(),
                op: *op,
                value: ValueShape::of(value),
            }
        }
        Element::In { path, values } => {
            arguments.push(Argument::List(values.clone()));
            ElementShape::In {
                path: path.clone(),
                count: values.len(),
            }
        }
        Element::Insert(record) => ElementShape::Insert(*record),
        Element::Values(records) => {
            arguments.push(Argument::Records(records.clone()));
            ElementShape::Values(records.iter().map(|record| record.handle()).collect())
        }
        Element::Update { record, alias } => ElementShape::Update {
            record: *record,
            alias: alias.clone(),
        },
        Element::Set(record) => {
            arguments.push(Argument::Record(record.clone()));
            ElementShape::Set(record.handle())
        }
        Element::Match(record) => {
            arguments.push(Argument::Record(record.clone()));
            ElementShape::Match(record.handle())
        }
        Element::Delete { record, alias } => ElementShape::Delete {
            record: *record,
            alias: alias.clone(),
        },
        Element::Subquery(template) => ElementShape::Subquery(walk(template, arguments)),
        Element::Limit(count) => {
            arguments.push(Argument::Count(*count));
            ElementShape::Limit
        }
        Element::Offset(count) => {
            arguments.push(Argument::Count(*count));
            ElementShape::Offset
        }
        Element::Lock(mode) => ElementShape::Lock(*mode),
        Element::NextValue(sequence) => ElementShape::NextValue(sequence.clone()),
    }
}
