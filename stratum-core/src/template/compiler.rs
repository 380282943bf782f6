//! Template compilation.
//!
//! Two passes per scope level: the first registers every table the level
//! declares (so columns may precede their `FROM`), the second walks the
//! fragments and elements in order and emits SQL. Placeholders are numbered
//! while emitting, and every value-carrying element claims the next
//! argument position whether or not it binds anything.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::dialect::{LockMode, SqlDialect};
use crate::error::{MappingError, ModelError, TemplateError};
use crate::metamodel::Metamodel;
use crate::model::{Column, ForeignKey, Model, ModelRegistry};
use crate::record::{Record, TypeHandle};
use crate::scanner;
use crate::template::compiled::{
    CompiledTemplate, Encoding, PlanEntry, PlanKind, RowLayout, Segment, SegmentSource, SqlPart,
};
use crate::template::scope::{ScopeEntry, Scopes};
use crate::template::{Element, FieldPath, JoinKind, Operator, Template};
use crate::value::{SqlType, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    /// Render `Param`, `Compare` and `In` values as literals instead of binds.
    pub inline_parameters: bool,
}

pub fn compile(
    template: &Template,
    registry: &ModelRegistry,
    dialect: &dyn SqlDialect,
    options: CompileOptions,
) -> Result<CompiledTemplate, TemplateError> {
    let mut compiler = Compiler {
        registry,
        dialect,
        options,
        emitter: Emitter::default(),
        plan: Vec::new(),
        arguments: 0,
        scopes: Scopes::default(),
        pending: Vec::new(),
        row: None,
        segments: Vec::new(),
    };
    compiler.template(template, Mode::Top)?;

    let compiled = CompiledTemplate {
        parts: compiler.emitter.parts,
        sql: compiler.emitter.sql,
        plan: compiler.plan,
        arguments: compiler.arguments,
        row: compiler.row.map(Arc::new),
        segments: compiler.segments,
        dialect: dialect.name(),
    };
    tracing::debug!(
        dialect = dialect.name(),
        sql = %compiled.sql(),
        plan = compiled.plan.len(),
        "stratum template compiled"
    );
    Ok(compiled)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Top,
    Subquery,
    /// Condition of an explicit join; shares the enclosing scope.
    JoinCondition,
}

#[derive(Debug, Default)]
struct Emitter {
    parts: Vec<SqlPart>,
    sql: String,
    placeholders: usize,
}

impl Emitter {
    fn len(&self) -> usize {
        self.sql.len()
    }

    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.sql.push_str(text);
        match self.parts.last_mut() {
            Some(SqlPart::Text(last)) => last.push_str(text),
            _ => self.parts.push(SqlPart::Text(text.to_owned())),
        }
    }

    fn literal(&mut self, entry: usize, offset: usize) {
        self.sql.push('?');
        self.parts.push(SqlPart::Literal { entry, offset });
    }

    fn placeholder(&mut self, dialect: &dyn SqlDialect) -> String {
        self.placeholders += 1;
        dialect.placeholder(self.placeholders)
    }
}

#[derive(Debug)]
struct AutoJoin {
    kind: JoinKind,
    table: String,
    alias: String,
    on: String,
}

/// Output of the registration pass, consumed in order by the emit pass.
#[derive(Debug)]
struct Registered {
    table: String,
    alias: Option<String>,
    joins: Vec<AutoJoin>,
}

struct Compiler<'a> {
    registry: &'a ModelRegistry,
    dialect: &'a dyn SqlDialect,
    options: CompileOptions,
    emitter: Emitter,
    plan: Vec<PlanEntry>,
    arguments: usize,
    scopes: Scopes,
    pending: Vec<VecDeque<Registered>>,
    row: Option<RowLayout>,
    segments: Vec<Segment>,
}

impl Compiler<'_> {
    fn template(&mut self, template: &Template, mode: Mode) -> Result<(), TemplateError> {
        self.scopes.push_level();
        self.pending.push(VecDeque::new());
        let result = self
            .register(template)
            .and_then(|()| self.emit(template, mode));
        self.pending.pop();
        self.scopes.pop_level();
        result
    }

    fn escape(&self, ident: &str) -> String {
        self.dialect.escape_identifier(ident)
    }

    fn model(&self, record: TypeHandle) -> Result<Arc<Model>, TemplateError> {
        Ok(self.registry.get(record)?)
    }

    /// Model of a table record; projections and inline records are read-only.
    fn writable(&self, record: TypeHandle, operation: &'static str) -> Result<Arc<Model>, TemplateError> {
        let model = self.model(record)?;
        if !model.is_table() {
            return Err(TemplateError::ReadOnly {
                type_name: record.name().to_owned(),
                operation,
            });
        }
        Ok(model)
    }

    fn register(&mut self, template: &Template) -> Result<(), TemplateError> {
        for element in template.elements() {
            if let Element::From {
                alias: Some(alias), ..
            }
            | Element::Join {
                alias: Some(alias), ..
            }
            | Element::Table {
                alias: Some(alias), ..
            } = element
            {
                self.scopes.reserve(alias);
            }
        }

        for element in template.elements() {
            let registered = match element {
                Element::From {
                    record,
                    alias,
                    auto_join,
                } => self.register_table(*record, alias.as_deref(), *auto_join)?,
                Element::Join { record, alias, .. } | Element::Table { record, alias } => {
                    self.register_table(*record, alias.as_deref(), false)?
                }
                Element::Insert(record) => self.register_statement(*record, None)?,
                Element::Update { record, alias } => {
                    let alias = alias.as_deref().filter(|_| self.dialect.supports_update_alias());
                    self.register_statement(*record, alias)?
                }
                Element::Delete { record, alias } => {
                    let alias = alias.as_deref().filter(|_| self.dialect.supports_delete_alias());
                    self.register_statement(*record, alias)?
                }
                _ => continue,
            };
            if let Some(level) = self.pending.last_mut() {
                level.push_back(registered);
            }
        }
        Ok(())
    }

    fn register_table(
        &mut self,
        record: TypeHandle,
        alias: Option<&str>,
        auto_join: bool,
    ) -> Result<Registered, TemplateError> {
        let model = self.model(record)?;
        let table = self.escape(model.table_name());
        let alias = match alias {
            Some(alias) => self.escape(alias),
            None => self.scopes.generate(model.table_name(), self.dialect),
        };
        let group = self.scopes.next_group();
        self.scopes.register(ScopeEntry {
            record,
            table: table.clone(),
            alias: Some(alias.clone()),
            explicit: true,
            group,
            table_path: Vec::new(),
        })?;

        let mut joins = Vec::new();
        if auto_join {
            let mut stack = vec![record];
            self.auto_join(&model, &[], &alias, group, false, &mut stack, &mut joins)?;
        }
        Ok(Registered {
            table,
            alias: Some(alias),
            joins,
        })
    }

    fn register_statement(
        &mut self,
        record: TypeHandle,
        alias: Option<&str>,
    ) -> Result<Registered, TemplateError> {
        let model = self.model(record)?;
        let table = self.escape(model.table_name());
        let alias = alias.map(|alias| self.escape(alias));
        let group = self.scopes.next_group();
        self.scopes.register(ScopeEntry {
            record,
            table: table.clone(),
            alias: alias.clone(),
            explicit: true,
            group,
            table_path: Vec::new(),
        })?;
        Ok(Registered {
            table,
            alias,
            joins: Vec::new(),
        })
    }

    /// Registers implicit joins for every eager foreign key below `model`.
    #[allow(clippy::too_many_arguments)]
    fn auto_join(
        &mut self,
        model: &Model,
        path: &[usize],
        parent_alias: &str,
        group: usize,
        left: bool,
        stack: &mut Vec<TypeHandle>,
        joins: &mut Vec<AutoJoin>,
    ) -> Result<(), TemplateError> {
        let columns = model.columns();
        let mut index = 0;
        while index < columns.len() {
            let column = &columns[index];
            let Some(ForeignKey {
                target,
                lazy: false,
            }) = column.foreign_key
            else {
                index += 1;
                continue;
            };
            let foreign: Vec<&Column> = columns[index..]
                .iter()
                .take_while(|other| other.path == column.path)
                .collect();
            index += foreign.len();

            if stack.contains(&target) {
                let mut names: Vec<&str> = stack.iter().map(|ty| ty.name()).collect();
                names.push(target.name());
                return Err(ModelError::Cycle {
                    path: names.join(" -> "),
                }
                .into());
            }
            let target_model = self.model(target)?;
            let keys = target_model.key_columns();
            if keys.len() != foreign.len() {
                return Err(TemplateError::Invalid(format!(
                    "foreign key {}.{} does not match the key of {}",
                    model.name(),
                    column.name,
                    target.name()
                )));
            }

            let left = left || column.nullable;
            let alias = self.scopes.generate(target_model.table_name(), self.dialect);
            let mut table_path = path.to_vec();
            table_path.extend_from_slice(&column.path);
            let table = self.escape(target_model.table_name());
            self.scopes.register(ScopeEntry {
                record: target,
                table: table.clone(),
                alias: Some(alias.clone()),
                explicit: false,
                group,
                table_path: table_path.clone(),
            })?;

            let on = foreign
                .iter()
                .zip(&keys)
                .map(|(fk, key)| {
                    format!(
                        "{parent_alias}.{} = {alias}.{}",
                        self.escape(&fk.name),
                        self.escape(&key.name)
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            joins.push(AutoJoin {
                kind: if left { JoinKind::Left } else { JoinKind::Inner },
                table,
                alias: alias.clone(),
                on,
            });

            stack.push(target);
            let nested = self.auto_join(&target_model, &table_path, &alias, group, left, stack, joins);
            stack.pop();
            nested?;
        }
        Ok(())
    }

    fn take_registered(&mut self, mode: Mode) -> Result<Registered, TemplateError> {
        if mode == Mode::JoinCondition {
            return Err(TemplateError::Invalid(
                "join conditions cannot declare tables".to_owned(),
            ));
        }
        self.pending
            .last_mut()
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| TemplateError::Invalid("table element was not registered".to_owned()))
    }

    fn emit(&mut self, template: &Template, mode: Mode) -> Result<(), TemplateError> {
        let elements = template.elements();
        for (index, fragment) in template.fragments().iter().enumerate() {
            let open_comment = scanner::ends_in_line_comment(fragment, self.dialect)
                .map_err(|source| TemplateError::Scan {
                    fragment: index,
                    source,
                })?;
            let element = elements.get(index);
            if open_comment && element.is_some() {
                return Err(TemplateError::Invalid(format!(
                    "fragment {index} ends inside a line comment"
                )));
            }

            let start = self.emitter.len();
            self.emitter.text(fragment);
            if mode == Mode::Top && !fragment.is_empty() {
                self.segments.push(Segment {
                    source: SegmentSource::Fragment(index),
                    range: start..self.emitter.len(),
                });
            }

            if let Some(element) = element {
                let start = self.emitter.len();
                self.element(element, mode)?;
                if mode == Mode::Top {
                    self.segments.push(Segment {
                        source: SegmentSource::Element(index),
                        range: start..self.emitter.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn next_argument(&mut self) -> usize {
        self.arguments += 1;
        self.arguments - 1
    }

    fn push_plan(&mut self, argument: usize, kind: PlanKind, width: usize, inline: bool) -> usize {
        self.plan.push(PlanEntry {
            argument,
            kind,
            width,
            inline,
        });
        self.plan.len() - 1
    }

    fn marker(&mut self, entry: usize, offset: usize, inline: bool) {
        if inline {
            self.emitter.literal(entry, offset);
        } else {
            let placeholder = self.emitter.placeholder(self.dialect);
            self.emitter.text(&placeholder);
        }
    }

    fn markers(&mut self, entry: usize, range: std::ops::Range<usize>, inline: bool) {
        for (position, offset) in range.enumerate() {
            if position > 0 {
                self.emitter.text(", ");
            }
            self.marker(entry, offset, inline);
        }
    }

    fn element(&mut self, element: &Element, mode: Mode) -> Result<(), TemplateError> {
        match element {
            Element::Select(record) => self.select(*record, mode),
            Element::From { .. } | Element::Table { .. } => {
                let registered = self.take_registered(mode)?;
                let mut sql = table_with_alias(&registered.table, registered.alias.as_deref());
                for join in &registered.joins {
                    sql.push_str(&format!(
                        " {} {} {} ON {}",
                        join.kind.keyword(),
                        join.table,
                        join.alias,
                        join.on
                    ));
                }
                self.emitter.text(&sql);
                Ok(())
            }
            Element::Join { kind, on, .. } => {
                let registered = self.take_registered(mode)?;
                let table = table_with_alias(&registered.table, registered.alias.as_deref());
                self.emitter.text(&format!("{} {table}", kind.keyword()));
                if *kind == JoinKind::Cross {
                    if !on.is_empty() {
                        return Err(TemplateError::Invalid(
                            "CROSS JOIN takes no condition".to_owned(),
                        ));
                    }
                    return Ok(());
                }
                self.emitter.text(" ON ");
                self.emit(on, Mode::JoinCondition)
            }
            Element::Alias(record) => {
                let label = self.scopes.resolve(*record, &[], *record, None)?.label();
                self.emitter.text(&label);
                Ok(())
            }
            Element::Column(path) => {
                let (_, columns) = self.columns(path)?;
                self.emitter.text(&columns.join(", "));
                Ok(())
            }
            Element::Param(value) => self.param(value, self.options.inline_parameters),
            Element::Inline(value) => self.param(value, true),
            Element::Compare { path, op, value } => self.compare(path, *op, value),
            Element::In { path, values } => self.in_list(path, values),
            Element::Insert(record) => {
                let registered = self.take_registered(mode)?;
                let model = self.writable(*record, "INSERT")?;
                let columns: Vec<String> = model
                    .insertable_columns()
                    .iter()
                    .map(|column| self.escape(&column.name))
                    .collect();
                self.emitter.text(&format!(
                    "INSERT INTO {} ({})",
                    registered.table,
                    columns.join(", ")
                ));
                Ok(())
            }
            Element::Values(records) => self.values(records),
            Element::Update { record, .. } => {
                let registered = self.take_registered(mode)?;
                self.writable(*record, "UPDATE")?;
                let target = table_with_alias(&registered.table, registered.alias.as_deref());
                self.emitter.text(&format!("UPDATE {target}"));
                Ok(())
            }
            Element::Set(record) => self.set(record),
            Element::Match(record) => self.matching(record),
            Element::Delete { record, .. } => {
                let registered = self.take_registered(mode)?;
                self.writable(*record, "DELETE")?;
                let prefix = self
                    .dialect
                    .delete_prefix(&registered.table, registered.alias.as_deref());
                self.emitter.text(&prefix);
                Ok(())
            }
            Element::Subquery(template) => {
                self.emitter.text("(");
                self.template(template, Mode::Subquery)?;
                self.emitter.text(")");
                Ok(())
            }
            Element::Limit(_) | Element::Offset(_) => {
                let argument = self.next_argument();
                self.push_plan(argument, PlanKind::Count, 1, false);
                let placeholder = self.emitter.placeholder(self.dialect);
                let sql = if matches!(element, Element::Limit(_)) {
                    self.dialect.limit(&placeholder)
                } else {
                    self.dialect.offset(&placeholder)
                };
                self.emitter.text(&sql);
                Ok(())
            }
            Element::Lock(lock) => {
                let hint = self.dialect.lock_hint(*lock).ok_or_else(|| {
                    let feature = match lock {
                        LockMode::Share => "FOR SHARE",
                        LockMode::Update => "FOR UPDATE",
                    };
                    TemplateError::Unsupported {
                        feature: feature.to_owned(),
                        dialect: self.dialect.name(),
                    }
                })?;
                self.emitter.text(hint);
                Ok(())
            }
            Element::NextValue(sequence) => {
                let next = self.next_value(sequence)?;
                self.emitter.text(&next);
                Ok(())
            }
        }
    }

    fn next_value(&self, sequence: &str) -> Result<String, TemplateError> {
        self.dialect
            .sequence_next_value(sequence)
            .ok_or_else(|| TemplateError::Unsupported {
                feature: format!("sequence {sequence}"),
                dialect: self.dialect.name(),
            })
    }

    fn select(&mut self, record: TypeHandle, mode: Mode) -> Result<(), TemplateError> {
        let base = self.scopes.resolve(record, &[], record, None)?.clone();
        let row = self.registry.row_columns(record)?;
        let mut rendered = Vec::with_capacity(row.len());
        for column in &row {
            let owner = if column.table_path.is_empty() {
                &base
            } else {
                match self.scopes.joined(&base, &column.table_path) {
                    Some(entry) => entry,
                    None => self.scopes.by_type(column.record)?.ok_or_else(|| {
                        TemplateError::UnknownTable {
                            type_name: column.record.name().to_owned(),
                        }
                    })?,
                }
            };
            rendered.push(owner.qualify(&self.escape(&column.name)));
        }
        self.emitter.text(&rendered.join(", "));

        if mode == Mode::Top {
            if self.row.is_some() {
                return Err(TemplateError::Invalid(
                    "a template can select only one record".to_owned(),
                ));
            }
            self.row = Some(RowLayout {
                record,
                types: row.iter().map(|column| column.sql_type).collect(),
            });
        }
        Ok(())
    }

    /// Qualified columns of `path`, with the resolved path.
    fn columns(&self, path: &FieldPath) -> Result<(Metamodel, Vec<String>), TemplateError> {
        let resolved = Metamodel::resolve(self.registry, path.root, &path.dotted)?;
        let table = resolved.table_type();
        let alias = path.alias.as_deref().map(|alias| self.escape(alias));
        let entry = self
            .scopes
            .resolve(path.root, &resolved.table_path(), table, alias.as_deref())?;
        let model = self.model(table)?;
        let columns: Vec<String> = model
            .columns_under(&resolved.column_path())
            .iter()
            .map(|column| entry.qualify(&self.escape(&column.name)))
            .collect();
        if columns.is_empty() {
            return Err(TemplateError::UnknownColumn {
                path: path.to_string(),
            });
        }
        Ok((resolved, columns))
    }

    fn param(&mut self, value: &Value, inline: bool) -> Result<(), TemplateError> {
        let argument = self.next_argument();
        let (encoding, width) = match value {
            Value::Record(record) => {
                let handle = record.handle();
                let width = self.model(handle)?.key_columns().len();
                if width == 0 {
                    return Err(MappingError::NoPrimaryKey {
                        type_name: handle.name().to_owned(),
                    }
                    .into());
                }
                (Encoding::Key(handle), width)
            }
            _ => (Encoding::Identity, 1),
        };
        let entry = self.push_plan(argument, PlanKind::Value(encoding), width, inline);
        self.markers(entry, 0..width, inline);
        Ok(())
    }

    fn compare(&mut self, path: &FieldPath, op: Operator, value: &Value) -> Result<(), TemplateError> {
        let argument = self.next_argument();
        let (resolved, columns) = self.columns(path)?;

        if value.is_null() {
            let test = match op {
                Operator::Eq => "IS NULL",
                Operator::Ne => "IS NOT NULL",
                other => {
                    return Err(TemplateError::Invalid(format!(
                        "NULL cannot be compared with {}",
                        other.symbol()
                    )));
                }
            };
            let tests: Vec<String> = columns.iter().map(|c| format!("{c} {test}")).collect();
            let sql = match tests.as_slice() {
                [single] => single.clone(),
                _ if op == Operator::Eq => format!("({})", tests.join(" AND ")),
                _ => format!("({})", tests.join(" OR ")),
            };
            self.emitter.text(&sql);
            return Ok(());
        }

        let leaf = resolved.leaf().cloned().ok_or_else(|| TemplateError::UnknownColumn {
            path: path.to_string(),
        })?;
        let inline = self.options.inline_parameters;
        let entry = self.push_plan(
            argument,
            PlanKind::Value(Encoding::Field(leaf)),
            columns.len(),
            inline,
        );

        if let [column] = columns.as_slice() {
            self.emitter.text(&format!("{column} {} ", op.symbol()));
            self.marker(entry, 0, inline);
            return Ok(());
        }

        let open = match op {
            Operator::Eq => "(",
            Operator::Ne => "NOT (",
            other => {
                return Err(TemplateError::Invalid(format!(
                    "{} cannot compare the composite column {path}",
                    other.symbol()
                )));
            }
        };
        self.emitter.text(open);
        for (offset, column) in columns.iter().enumerate() {
            if offset > 0 {
                self.emitter.text(" AND ");
            }
            self.emitter.text(&format!("{column} = "));
            self.marker(entry, offset, inline);
        }
        self.emitter.text(")");
        Ok(())
    }

    fn in_list(&mut self, path: &FieldPath, values: &[Value]) -> Result<(), TemplateError> {
        let argument = self.next_argument();
        let (resolved, columns) = self.columns(path)?;
        if values.is_empty() {
            self.emitter.text("1 = 0");
            return Ok(());
        }

        let leaf = resolved.leaf().cloned().ok_or_else(|| TemplateError::UnknownColumn {
            path: path.to_string(),
        })?;
        let inline = self.options.inline_parameters;
        let width = columns.len();
        let entry = self.push_plan(
            argument,
            PlanKind::List(Encoding::Field(leaf)),
            width * values.len(),
            inline,
        );

        if let [column] = columns.as_slice() {
            self.emitter.text(&format!("{column} IN ("));
            self.markers(entry, 0..values.len(), inline);
            self.emitter.text(")");
        } else if self.dialect.supports_tuple_in() {
            self.emitter.text(&format!("({}) IN (", columns.join(", ")));
            for row in 0..values.len() {
                if row > 0 {
                    self.emitter.text(", ");
                }
                self.emitter.text("(");
                self.markers(entry, row * width..(row + 1) * width, inline);
                self.emitter.text(")");
            }
            self.emitter.text(")");
        } else {
            self.emitter.text("(");
            for row in 0..values.len() {
                if row > 0 {
                    self.emitter.text(" OR ");
                }
                self.emitter.text("(");
                for (part, column) in columns.iter().enumerate() {
                    if part > 0 {
                        self.emitter.text(" AND ");
                    }
                    self.emitter.text(&format!("{column} = "));
                    self.marker(entry, row * width + part, inline);
                }
                self.emitter.text(")");
            }
            self.emitter.text(")");
        }
        Ok(())
    }

    fn values(&mut self, records: &[Arc<dyn Record>]) -> Result<(), TemplateError> {
        let argument = self.next_argument();
        let Some(first) = records.first() else {
            return Err(TemplateError::Invalid(
                "VALUES needs at least one record".to_owned(),
            ));
        };
        let handle = first.handle();
        if let Some(other) = records.iter().find(|record| record.handle() != handle) {
            return Err(TemplateError::Invalid(format!(
                "VALUES mixes {} and {} records",
                handle.name(),
                other.handle().name()
            )));
        }

        let model = self.writable(handle, "VALUES")?;
        let insertable = model.insertable_columns();
        let bound: Vec<usize> = insertable
            .iter()
            .filter(|column| column.sequence.is_none())
            .map(|column| column.index)
            .collect();
        let entry = self.push_plan(
            argument,
            PlanKind::Columns {
                record: handle,
                columns: bound.clone(),
            },
            bound.len() * records.len(),
            false,
        );

        self.emitter.text("VALUES ");
        let mut offset = 0;
        for row in 0..records.len() {
            if row > 0 {
                self.emitter.text(", ");
            }
            self.emitter.text("(");
            for (position, column) in insertable.iter().enumerate() {
                if position > 0 {
                    self.emitter.text(", ");
                }
                match column.sequence {
                    Some(sequence) => {
                        let next = self.next_value(sequence)?;
                        self.emitter.text(&next);
                    }
                    None => {
                        self.marker(entry, offset, false);
                        offset += 1;
                    }
                }
            }
            self.emitter.text(")");
        }
        Ok(())
    }

    fn set(&mut self, record: &Arc<dyn Record>) -> Result<(), TemplateError> {
        let argument = self.next_argument();
        let handle = record.handle();
        let model = self.writable(handle, "SET")?;
        let updatable = model.updatable_columns();
        let version = model.version_column();
        if updatable.is_empty() && version.is_none() {
            return Err(TemplateError::Invalid(format!(
                "{} has no updatable columns",
                handle.name()
            )));
        }

        let entry = self.push_plan(
            argument,
            PlanKind::Columns {
                record: handle,
                columns: updatable.iter().map(|column| column.index).collect(),
            },
            updatable.len(),
            false,
        );
        self.emitter.text("SET ");
        for (offset, column) in updatable.iter().enumerate() {
            if offset > 0 {
                self.emitter.text(", ");
            }
            self.emitter.text(&format!("{} = ", self.escape(&column.name)));
            self.marker(entry, offset, false);
        }
        if let Some(version) = version {
            if !updatable.is_empty() {
                self.emitter.text(", ");
            }
            let name = self.escape(&version.name);
            let next = if version.sql_type == SqlType::Timestamp {
                self.dialect.current_timestamp_fn().to_owned()
            } else {
                format!("{name} + 1")
            };
            self.emitter.text(&format!("{name} = {next}"));
        }
        Ok(())
    }

    fn matching(&mut self, record: &Arc<dyn Record>) -> Result<(), TemplateError> {
        let argument = self.next_argument();
        let handle = record.handle();
        let model = self.writable(handle, "MATCH")?;
        let mut columns = model.key_columns();
        if columns.is_empty() {
            return Err(MappingError::NoPrimaryKey {
                type_name: handle.name().to_owned(),
            }
            .into());
        }
        columns.extend(model.version_column());

        let qualifier = self.scopes.by_type(handle)?.cloned();
        let names: Vec<String> = columns
            .iter()
            .map(|column| {
                let name = self.escape(&column.name);
                match &qualifier {
                    Some(entry) => entry.qualify(&name),
                    None => name,
                }
            })
            .collect();
        let entry = self.push_plan(
            argument,
            PlanKind::Columns {
                record: handle,
                columns: columns.iter().map(|column| column.index).collect(),
            },
            columns.len(),
            false,
        );
        for (offset, name) in names.iter().enumerate() {
            if offset > 0 {
                self.emitter.text(" AND ");
            }
            self.emitter.text(&format!("{name} = "));
            self.marker(entry, offset, false);
        }
        Ok(())
    }
}

fn table_with_alias(table: &str, alias: Option<&str>) -> String {
    match alias {
        Some(alias) => format!("{table} {alias}"),
        None => table.to_owned(),
    }
}
