//! Structured query templates.
//!
//! A [`Template`] interleaves raw SQL fragments with typed [`Element`]s,
//! always one more fragment than elements. Compilation resolves the
//! elements against record models and a dialect; the result depends only on
//! the template's [`shape`](shape::TemplateShape), never on the values it
//! carries, so it can be cached and re-bound.

pub mod compiled;
mod compiler;
mod scope;
pub mod shape;

use std::fmt;
use std::sync::Arc;

use crate::dialect::LockMode;
use crate::error::TemplateError;
use crate::metamodel::Metamodel;
use crate::record::{Record, RecordType, TypeHandle};
use crate::value::Value;

pub use compiled::{CompiledTemplate, RowLayout, Segment, SegmentSource, Statement};
pub use compiler::{CompileOptions, compile};
pub use shape::{Argument, TemplateKey, TemplateShape};

/// Dotted field path rooted at a record type, resolved at compile time.
///
/// `alias` pins the path to one table alias, which is how self-joins pick
/// a side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub root: TypeHandle,
    pub dotted: String,
    pub alias: Option<String>,
}

impl FieldPath {
    pub fn new(root: TypeHandle, dotted: impl Into<String>) -> Self {
        Self {
            root,
            dotted: dotted.into(),
            alias: None,
        }
    }

    pub fn of<T: RecordType>(dotted: impl Into<String>) -> Self {
        Self::new(TypeHandle::of::<T>(), dotted)
    }

    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl From<&Metamodel> for FieldPath {
    fn from(path: &Metamodel) -> Self {
        let dotted = path
            .hops()
            .iter()
            .map(|field| field.name)
            .collect::<Vec<_>>()
            .join(".");
        Self::new(path.root_type(), dotted)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}({alias}).{}", self.root, self.dotted),
            None => write!(f, "{}.{}", self.root, self.dotted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
        }
    }
}

/// Typed placeholder inside a template.
#[derive(Debug, Clone)]
pub enum Element {
    /// Column list of a record, eager joins included.
    Select(TypeHandle),
    /// `table alias` plus generated joins for eager foreign keys.
    From {
        record: TypeHandle,
        alias: Option<String>,
        auto_join: bool,
    },
    Join {
        kind: JoinKind,
        record: TypeHandle,
        alias: Option<String>,
        on: Template,
    },
    Table {
        record: TypeHandle,
        alias: Option<String>,
    },
    Alias(TypeHandle),
    Column(FieldPath),
    /// Bind marker; records bind their primary key.
    Param(Value),
    /// Value rendered as a literal when the statement is bound.
    Inline(Value),
    Compare {
        path: FieldPath,
        op: Operator,
        value: Value,
    },
    In {
        path: FieldPath,
        values: Vec<Value>,
    },
    Insert(TypeHandle),
    Values(Vec<Arc<dyn Record>>),
    Update {
        record: TypeHandle,
        alias: Option<String>,
    },
    Set(Arc<dyn Record>),
    /// Primary key, and version when present, of a record.
    Match(Arc<dyn Record>),
    Delete {
        record: TypeHandle,
        alias: Option<String>,
    },
    Subquery(Template),
    Limit(u64),
    Offset(u64),
    Lock(LockMode),
    NextValue(String),
}

#[derive(Debug, Clone)]
pub struct Template {
    fragments: Vec<String>,
    elements: Vec<Element>,
}

impl Template {
    pub fn new(fragments: Vec<String>, elements: Vec<Element>) -> Result<Self, TemplateError> {
        if fragments.len() != elements.len() + 1 {
            return Err(TemplateError::Unbalanced {
                fragments: fragments.len(),
                elements: elements.len(),
                expected: elements.len() + 1,
            });
        }
        Ok(Self {
            fragments,
            elements,
        })
    }

    /// Template made of raw SQL only.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            fragments: vec![sql.into()],
            elements: Vec::new(),
        }
    }

    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.fragments.iter().all(|f| f.trim().is_empty())
    }
}

/// Incremental template construction; always balanced.
///
/// ```
/// use stratum_core::template::{Operator, Template};
/// # fn build<Pet: stratum_core::record::RecordType>() -> Template {
/// Template::builder()
///     .sql("SELECT ")
///     .select::<Pet>()
///     .sql(" FROM ")
///     .from::<Pet>()
///     .sql(" WHERE ")
///     .compare::<Pet>("name", Operator::Eq, "Leo")
///     .build()
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    fragments: Vec<String>,
    elements: Vec<Element>,
}

impl Default for TemplateBuilder {
    fn default() -> Self {
        Self {
            fragments: vec![String::new()],
            elements: Vec::new(),
        }
    }
}

impl TemplateBuilder {
    /// Appends raw SQL to the current fragment.
    pub fn sql(mut self, text: &str) -> Self {
        if let Some(fragment) = self.fragments.last_mut() {
            fragment.push_str(text);
        }
        self
    }

    pub fn element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self.fragments.push(String::new());
        self
    }

    pub fn select<T: RecordType>(self) -> Self {
        self.element(Element::Select(TypeHandle::of::<T>()))
    }

    pub fn from<T: RecordType>(self) -> Self {
        self.element(Element::From {
            record: TypeHandle::of::<T>(),
            alias: None,
            auto_join: true,
        })
    }

    pub fn from_as<T: RecordType>(self, alias: &str) -> Self {
        self.element(Element::From {
            record: TypeHandle::of::<T>(),
            alias: Some(alias.to_owned()),
            auto_join: true,
        })
    }

    /// `FROM` without generated joins.
    pub fn from_only<T: RecordType>(self, alias: Option<&str>) -> Self {
        self.element(Element::From {
            record: TypeHandle::of::<T>(),
            alias: alias.map(str::to_owned),
            auto_join: false,
        })
    }

    pub fn join<T: RecordType>(self, kind: JoinKind, alias: Option<&str>, on: Template) -> Self {
        self.element(Element::Join {
            kind,
            record: TypeHandle::of::<T>(),
            alias: alias.map(str::to_owned),
            on,
        })
    }

    pub fn table<T: RecordType>(self, alias: Option<&str>) -> Self {
        self.element(Element::Table {
            record: TypeHandle::of::<T>(),
            alias: alias.map(str::to_owned),
        })
    }

    pub fn alias<T: RecordType>(self) -> Self {
        self.element(Element::Alias(TypeHandle::of::<T>()))
    }

    pub fn column<T: RecordType>(self, dotted: &str) -> Self {
        self.element(Element::Column(FieldPath::of::<T>(dotted)))
    }

    pub fn column_path(self, path: FieldPath) -> Self {
        self.element(Element::Column(path))
    }

    pub fn param(self, value: impl Into<Value>) -> Self {
        self.element(Element::Param(value.into()))
    }

    pub fn inline(self, value: impl Into<Value>) -> Self {
        self.element(Element::Inline(value.into()))
    }

    pub fn compare<T: RecordType>(self, dotted: &str, op: Operator, value: impl Into<Value>) -> Self {
        self.element(Element::Compare {
            path: FieldPath::of::<T>(dotted),
            op,
            value: value.into(),
        })
    }

    pub fn compare_path(self, path: FieldPath, op: Operator, value: impl Into<Value>) -> Self {
        self.element(Element::Compare {
            path,
            op,
            value: value.into(),
        })
    }

    pub fn in_list<T: RecordType, V: Into<Value>>(
        self,
        dotted: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.element(Element::In {
            path: FieldPath::of::<T>(dotted),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn insert<T: RecordType>(self) -> Self {
        self.element(Element::Insert(TypeHandle::of::<T>()))
    }

    pub fn values(self, records: Vec<Arc<dyn Record>>) -> Self {
        self.element(Element::Values(records))
    }

    pub fn update<T: RecordType>(self, alias: Option<&str>) -> Self {
        self.element(Element::Update {
            record: TypeHandle::of::<T>(),
            alias: alias.map(str::to_owned),
        })
    }

    pub fn set(self, record: Arc<dyn Record>) -> Self {
        self.element(Element::Set(record))
    }

    pub fn matching(self, record: Arc<dyn Record>) -> Self {
        self.element(Element::Match(record))
    }

    pub fn delete<T: RecordType>(self, alias: Option<&str>) -> Self {
        self.element(Element::Delete {
            record: TypeHandle::of::<T>(),
            alias: alias.map(str::to_owned),
        })
    }

    pub fn subquery(self, template: Template) -> Self {
        self.element(Element::Subquery(template))
    }

    pub fn limit(self, count: u64) -> Self {
        self.element(Element::Limit(count))
    }

    pub fn offset(self, count: u64) -> Self {
        self.element(Element::Offset(count))
    }

    pub fn lock(self, mode: LockMode) -> Self {
        self.element(Element::Lock(mode))
    }

    pub fn next_value(self, sequence: &str) -> Self {
        self.element(Element::NextValue(sequence.to_owned()))
    }

    pub fn build(self) -> Template {
        Template {
            fragments: self.fragments,
            elements: self.elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Pet;

    #[test]
    fn unbalanced_templates_are_rejected() {
        let err = Template::new(vec!["SELECT ".to_owned()], vec![Element::Limit(1)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Template has 1 fragments for 1 elements; expected 2"
        );
    }

    #[test]
    fn builder_keeps_fragments_balanced() {
        let template = Template::builder()
            .sql("SELECT ")
            .select::<Pet>()
            .sql(" FROM ")
            .from::<Pet>()
            .build();
        assert_eq!(template.elements().len(), 2);
        assert_eq!(template.fragments(), ["SELECT ", " FROM ", ""]);
    }
}
