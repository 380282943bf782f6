//! Cached, immutable descriptions of record types.
//!
//! A [`Model`] is built once per record type and registry from the type's
//! [`RecordDescriptor`]. It resolves physical names, converters and the flat
//! column layout that the mapper and the template compiler share.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::annotation::{AnnotationKind, Annotations, Generation};
use crate::converter::{Converter, ConverterRegistry};
use crate::error::ModelError;
use crate::naming::Naming;
use crate::record::{FieldSpec, RecordDescriptor, RecordKind, RecordType, TypeHandle, ValueType};
use crate::value::SqlType;

/// How a field is stored.
#[derive(Debug)]
pub enum FieldKind {
    /// One or more columns produced by the field's converter.
    Scalar,
    /// Nested record flattened into the owner's table.
    Inline { fields: Vec<Arc<Field>> },
    /// Columns holding the primary key of `target`; `key` is the target's key field.
    ForeignKey {
        target: TypeHandle,
        key: Arc<Field>,
        lazy: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldColumn {
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug)]
pub struct Field {
    pub index: usize,
    pub name: &'static str,
    pub owner: TypeHandle,
    pub value_type: ValueType,
    pub nullable: bool,
    pub mutable: bool,
    pub annotations: Annotations,
    pub converter: Option<Arc<dyn Converter>>,
    pub kind: FieldKind,
    /// Own columns of scalar and foreign-key fields; empty for inline records.
    pub columns: Vec<FieldColumn>,
}

impl Field {
    pub fn is_primary_key(&self) -> bool {
        self.annotations.has(AnnotationKind::PrimaryKey)
    }

    pub fn is_version(&self) -> bool {
        self.annotations.has(AnnotationKind::Version)
    }

    pub fn is_foreign_key(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { .. })
    }

    pub fn is_ref(&self) -> bool {
        matches!(self.kind, FieldKind::ForeignKey { lazy: true, .. })
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.kind, FieldKind::Inline { .. })
    }

    pub fn generation(&self) -> Option<&Generation> {
        self.annotations.generation()
    }

    pub fn target(&self) -> Option<TypeHandle> {
        self.value_type.target()
    }

    /// Number of columns the field occupies in its owner's table.
    pub fn width(&self) -> usize {
        match &self.kind {
            FieldKind::Inline { fields } => fields.iter().map(|field| field.width()).sum(),
            _ => self.columns.len(),
        }
    }

    /// Leaf columns in mapping order, descending into inline records.
    pub fn leaf_columns(&self) -> Vec<FieldColumn> {
        let mut out = Vec::new();
        self.collect_leaf_columns(&mut out);
        out
    }

    fn collect_leaf_columns(&self, out: &mut Vec<FieldColumn>) {
        match &self.kind {
            FieldKind::Inline { fields } => {
                for field in fields {
                    field.collect_leaf_columns(out);
                }
            }
            _ => out.extend(self.columns.iter().cloned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub target: TypeHandle,
    pub lazy: bool,
}

/// One physical column of a model's table.
#[derive(Debug, Clone)]
pub struct Column {
    pub index: usize,
    /// Field indexes from the model down to the field owning this column.
    pub path: Vec<usize>,
    /// Position within the owning field's columns.
    pub part: usize,
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub version: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub sequence: Option<&'static str>,
    pub foreign_key: Option<ForeignKey>,
}

#[derive(Debug)]
pub struct Model {
    handle: TypeHandle,
    kind: RecordKind,
    table: String,
    annotations: Annotations,
    fields: Vec<Arc<Field>>,
    columns: Vec<Column>,
    primary_key: Option<Arc<Field>>,
    version: Option<Arc<Field>>,
}

impl Model {
    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    pub fn name(&self) -> &'static str {
        self.handle.name()
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_table(&self) -> bool {
        self.kind == RecordKind::Table
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_key(&self) -> Option<&Arc<Field>> {
        self.primary_key.as_ref()
    }

    pub fn version(&self) -> Option<&Arc<Field>> {
        self.version.as_ref()
    }

    pub fn key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn version_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.version)
    }

    pub fn insertable_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.insertable).collect()
    }

    pub fn updatable_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.updatable).collect()
    }

    /// Columns owned by the field at `path` or nested below it.
    pub fn columns_under(&self, path: &[usize]) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|c| c.path.starts_with(path))
            .collect()
    }
}

/// One column of the row produced by selecting a record with its eager joins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowColumn {
    /// Field indexes from the selected record to the joined table owning the column.
    pub table_path: Vec<usize>,
    /// Record type of the table owning the column.
    pub record: TypeHandle,
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    nullable: bool,
    primary_key: bool,
    identity: bool,
    sequence: Option<&'static str>,
    read_only: bool,
    frozen: bool,
}

fn cycle_path<S: AsRef<str>>(stack: &[(TypeHandle, S)], field: &str, target: TypeHandle) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(stack.len() + 1);
    for (position, (ty, _)) in stack.iter().enumerate() {
        let via = stack
            .get(position + 1)
            .map_or(field, |(_, name)| name.as_ref());
        parts.push(format!("{}.{via}", ty.name()));
    }
    parts.push(target.name().to_owned());
    parts.join(" -> ")
}

struct Builder<'r> {
    naming: &'r Naming,
    converters: &'r ConverterRegistry,
    validate: bool,
}

impl Builder<'_> {
    fn build(&self, handle: TypeHandle) -> Result<Model, ModelError> {
        let descriptor = handle.describe();
        let annotations = Annotations::from(descriptor.annotations.clone());
        let mut stack = vec![(handle, "")];
        let fields = self.fields(handle, &descriptor, &mut stack)?;

        let mut columns = Vec::new();
        collect_columns(&fields, &[], Flags::default(), &mut columns);

        if self.validate {
            self.check(&descriptor, &annotations, &fields, &columns)?;
            check_eager_cycles(handle)?;
        }

        Ok(Model {
            handle,
            kind: descriptor.kind,
            table: self.naming.table_name(&descriptor, &annotations),
            annotations,
            primary_key: fields.iter().find(|f| f.is_primary_key()).cloned(),
            version: fields.iter().find(|f| f.is_version()).cloned(),
            fields,
            columns,
        })
    }

    fn fields(
        &self,
        owner: TypeHandle,
        descriptor: &RecordDescriptor,
        stack: &mut Vec<(TypeHandle, &'static str)>,
    ) -> Result<Vec<Arc<Field>>, ModelError> {
        descriptor
            .fields
            .iter()
            .enumerate()
            .map(|(index, spec)| self.field(owner, index, spec, stack).map(Arc::new))
            .collect()
    }

    fn field(
        &self,
        owner: TypeHandle,
        index: usize,
        spec: &FieldSpec,
        stack: &mut Vec<(TypeHandle, &'static str)>,
    ) -> Result<Field, ModelError> {
        let annotations = Annotations::from(spec.annotations.clone());
        let mut converter = None;
        let mut columns = Vec::new();

        let kind = match spec.value_type {
            ValueType::Scalar(sql_type) => {
                if self.validate && annotations.has(AnnotationKind::ForeignKey) {
                    return Err(ModelError::InvalidForeignKey {
                        type_name: owner.name().to_owned(),
                        field: spec.name.to_owned(),
                        reason: "a foreign key must reference a record".to_owned(),
                    });
                }
                let resolved = self.converter_for(owner, spec, &annotations, sql_type)?;
                columns = self.scalar_columns(spec, &annotations, resolved.parameter_types());
                converter = Some(resolved);
                FieldKind::Scalar
            }
            ValueType::Ref(target) => {
                if self.validate && !annotations.has(AnnotationKind::ForeignKey) {
                    return Err(ModelError::InvalidForeignKey {
                        type_name: owner.name().to_owned(),
                        field: spec.name.to_owned(),
                        reason: "Ref fields must be annotated as foreign keys".to_owned(),
                    });
                }
                self.foreign_key(owner, spec, &annotations, target, true, &mut columns)?
            }
            ValueType::Record(target) if annotations.has(AnnotationKind::ForeignKey) => {
                self.foreign_key(owner, spec, &annotations, target, false, &mut columns)?
            }
            ValueType::Record(target) => {
                let nested = target.describe();
                if self.validate && nested.kind == RecordKind::Table {
                    return Err(ModelError::InvalidAnnotation {
                        type_name: owner.name().to_owned(),
                        field: spec.name.to_owned(),
                        reason: format!("table record {} must be a foreign key", target.name()),
                    });
                }
                if stack.iter().any(|(ty, _)| *ty == target) {
                    return Err(ModelError::Cycle {
                        path: cycle_path(stack, spec.name, target),
                    });
                }
                stack.push((target, spec.name));
                let fields = self.fields(target, &nested, stack);
                stack.pop();
                FieldKind::Inline { fields: fields? }
            }
        };

        Ok(Field {
            index,
            name: spec.name,
            owner,
            value_type: spec.value_type,
            nullable: spec.nullable,
            mutable: spec.mutable,
            annotations,
            converter,
            kind,
            columns,
        })
    }

    fn converter_for(
        &self,
        owner: TypeHandle,
        spec: &FieldSpec,
        annotations: &Annotations,
        sql_type: SqlType,
    ) -> Result<Arc<dyn Converter>, ModelError> {
        if let Some(name) = annotations.converter() {
            return self
                .converters
                .get(name)
                .ok_or_else(|| ModelError::UnknownConverter {
                    type_name: owner.name().to_owned(),
                    field: spec.name.to_owned(),
                    converter: name.to_owned(),
                });
        }
        if annotations.has(AnnotationKind::Json) {
            return Ok(self.converters.json());
        }
        Ok(self.converters.identity(sql_type))
    }

    fn scalar_columns(
        &self,
        spec: &FieldSpec,
        annotations: &Annotations,
        types: &[SqlType],
    ) -> Vec<FieldColumn> {
        if let [sql_type] = types {
            return vec![FieldColumn {
                name: self.naming.column_name(spec, annotations),
                sql_type: *sql_type,
            }];
        }
        let explicit = annotations.column_names();
        let base = self.naming.column_name(spec, &Annotations::default());
        types
            .iter()
            .enumerate()
            .map(|(part, sql_type)| FieldColumn {
                name: match explicit.get(part) {
                    Some(name) if explicit.len() == types.len() => (*name).to_owned(),
                    _ => format!("{base}_{}", part + 1),
                },
                sql_type: *sql_type,
            })
            .collect()
    }

    fn foreign_key(
        &self,
        owner: TypeHandle,
        spec: &FieldSpec,
        annotations: &Annotations,
        target: TypeHandle,
        lazy: bool,
        columns: &mut Vec<FieldColumn>,
    ) -> Result<FieldKind, ModelError> {
        let invalid = |reason: String| ModelError::InvalidForeignKey {
            type_name: owner.name().to_owned(),
            field: spec.name.to_owned(),
            reason,
        };

        let target_descriptor = target.describe();
        if self.validate && target_descriptor.kind != RecordKind::Table {
            return Err(invalid(format!("{} is not a table", target.name())));
        }
        let (key_index, key_spec) = target_descriptor
            .fields
            .iter()
            .enumerate()
            .find(|(_, field)| {
                Annotations::from(field.annotations.clone()).has(AnnotationKind::PrimaryKey)
            })
            .ok_or_else(|| invalid(format!("{} has no primary key", target.name())))?;
        let key_annotations = Annotations::from(key_spec.annotations.clone());
        if matches!(key_spec.value_type, ValueType::Ref(_))
            || key_annotations.has(AnnotationKind::ForeignKey)
        {
            return Err(invalid(format!(
                "primary key of {} must be a scalar or inline record",
                target.name()
            )));
        }

        let key = Arc::new(self.field(target, key_index, key_spec, &mut vec![(target, "")])?);
        let key_columns = key.leaf_columns();
        if let [key_column] = key_columns.as_slice() {
            columns.push(FieldColumn {
                name: self
                    .naming
                    .foreign_key_column_name(spec, annotations, &target_descriptor),
                sql_type: key_column.sql_type,
            });
        } else {
            let explicit = annotations.column_names();
            let base = self.naming.column_name(spec, &Annotations::default());
            for (part, key_column) in key_columns.iter().enumerate() {
                let name = match explicit.get(part) {
                    Some(name) if explicit.len() == key_columns.len() => (*name).to_owned(),
                    _ => format!("{base}_{}", key_column.name),
                };
                columns.push(FieldColumn {
                    name,
                    sql_type: key_column.sql_type,
                });
            }
        }

        Ok(FieldKind::ForeignKey { target, key, lazy })
    }

    fn check(
        &self,
        descriptor: &RecordDescriptor,
        annotations: &Annotations,
        fields: &[Arc<Field>],
        columns: &[Column],
    ) -> Result<(), ModelError> {
        let type_name = descriptor.name.to_owned();

        let keys = fields.iter().filter(|f| f.is_primary_key()).count();
        if keys > 1 {
            return Err(ModelError::Duplicate {
                type_name,
                annotation: AnnotationKind::PrimaryKey.name(),
            });
        }
        if keys == 0 && descriptor.kind == RecordKind::Table {
            return Err(ModelError::MissingPrimaryKey { type_name });
        }

        let versions: Vec<&Arc<Field>> = fields.iter().filter(|f| f.is_version()).collect();
        if versions.len() > 1 {
            return Err(ModelError::Duplicate {
                type_name,
                annotation: AnnotationKind::Version.name(),
            });
        }
        if let Some(version) = versions.first() {
            let supported = matches!(
                version.value_type.sql_type(),
                Some(sql_type) if sql_type.is_integer() || sql_type == SqlType::Timestamp
            );
            if !supported {
                return Err(ModelError::InvalidAnnotation {
                    type_name,
                    field: version.name.to_owned(),
                    reason: "a version must be an integer or a timestamp".to_owned(),
                });
            }
        }

        if let Some(misplaced) = annotations.misplaced() {
            return Err(misplaced_error(descriptor.name, "", misplaced.kind()));
        }
        if let Some(kind) = annotations.duplicated() {
            return Err(duplicated_error(descriptor.name, "", kind));
        }
        check_field_annotations(descriptor.name, fields)?;

        let mut seen = HashSet::new();
        for column in columns {
            if !seen.insert(column.name.to_lowercase()) {
                return Err(ModelError::DuplicateColumn {
                    type_name,
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn misplaced_error(type_name: &str, field: &str, kind: Option<AnnotationKind>) -> ModelError {
    ModelError::InvalidAnnotation {
        type_name: type_name.to_owned(),
        field: field.to_owned(),
        reason: match kind {
            Some(kind) => format!("{} annotations cannot be repeated", kind.name()),
            None => "annotation containers cannot be nested".to_owned(),
        },
    }
}

fn duplicated_error(type_name: &str, field: &str, kind: AnnotationKind) -> ModelError {
    ModelError::InvalidAnnotation {
        type_name: type_name.to_owned(),
        field: field.to_owned(),
        reason: format!("{} annotation given more than once", kind.name()),
    }
}

fn check_field_annotations(type_name: &str, fields: &[Arc<Field>]) -> Result<(), ModelError> {
    for field in fields {
        if let Some(misplaced) = field.annotations.misplaced() {
            return Err(misplaced_error(type_name, field.name, misplaced.kind()));
        }
        if let Some(kind) = field.annotations.duplicated() {
            return Err(duplicated_error(type_name, field.name, kind));
        }
        if let FieldKind::Inline { fields } = &field.kind {
            check_field_annotations(type_name, fields)?;
        }
    }
    Ok(())
}

fn collect_columns(fields: &[Arc<Field>], prefix: &[usize], parent: Flags, out: &mut Vec<Column>) {
    for field in fields {
        let mut path = prefix.to_vec();
        path.push(field.index);

        let (insertable, updatable) = field.annotations.persist();
        let generation = field.generation();
        let flags = Flags {
            nullable: parent.nullable || field.nullable,
            primary_key: parent.primary_key || field.is_primary_key(),
            identity: parent.identity || generation == Some(&Generation::Identity),
            sequence: match generation {
                Some(Generation::Sequence(sequence)) => Some(*sequence),
                _ => parent.sequence,
            },
            read_only: parent.read_only || !insertable,
            frozen: parent.frozen || !updatable,
        };

        match &field.kind {
            FieldKind::Inline { fields } => collect_columns(fields, &path, flags, out),
            kind => {
                let foreign_key = match kind {
                    FieldKind::ForeignKey { target, lazy, .. } => Some(ForeignKey {
                        target: *target,
                        lazy: *lazy,
                    }),
                    _ => None,
                };
                let version = field.is_version();
                for (part, column) in field.columns.iter().enumerate() {
                    out.push(Column {
                        index: out.len(),
                        path: path.clone(),
                        part,
                        name: column.name.clone(),
                        sql_type: column.sql_type,
                        nullable: flags.nullable,
                        primary_key: flags.primary_key,
                        version,
                        insertable: !flags.read_only && !flags.identity,
                        updatable: !flags.frozen && !flags.primary_key && !version,
                        sequence: flags.sequence,
                        foreign_key,
                    });
                }
            }
        }
    }
}

/// Rejects records that reach themselves through eager foreign keys or inline records.
fn check_eager_cycles(root: TypeHandle) -> Result<(), ModelError> {
    let mut stack = vec![(root, "")];
    let mut done = HashSet::new();
    visit_eager(root, &mut stack, &mut done)
}

fn visit_eager(
    handle: TypeHandle,
    stack: &mut Vec<(TypeHandle, &'static str)>,
    done: &mut HashSet<TypeId>,
) -> Result<(), ModelError> {
    for spec in handle.describe().fields {
        let ValueType::Record(target) = spec.value_type else {
            continue;
        };
        if stack.iter().any(|(ty, _)| *ty == target) {
            return Err(ModelError::Cycle {
                path: cycle_path(stack, spec.name, target),
            });
        }
        if done.contains(&target.id()) {
            continue;
        }
        stack.push((target, spec.name));
        let visited = visit_eager(target, stack, done);
        stack.pop();
        visited?;
        done.insert(target.id());
    }
    Ok(())
}

/// Builds and caches models.
///
/// Reads share a lock; a miss builds outside the lock and the first
/// published model wins.
#[derive(Debug)]
pub struct ModelRegistry {
    naming: Naming,
    converters: ConverterRegistry,
    validate: bool,
    models: RwLock<HashMap<TypeId, Arc<Model>>>,
}

static GLOBAL: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::default);

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(Naming::default(), ConverterRegistry::default(), true)
    }
}

impl ModelRegistry {
    pub fn new(naming: Naming, converters: ConverterRegistry, validate: bool) -> Self {
        Self {
            naming,
            converters,
            validate,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry with default naming and converters.
    pub fn global() -> &'static ModelRegistry {
        &GLOBAL
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    pub fn validates(&self) -> bool {
        self.validate
    }

    pub fn get(&self, handle: TypeHandle) -> Result<Arc<Model>, ModelError> {
        if let Some(model) = self.models.read().get(&handle.id()) {
            return Ok(model.clone());
        }

        let builder = Builder {
            naming: &self.naming,
            converters: &self.converters,
            validate: self.validate,
        };
        let model = Arc::new(builder.build(handle)?);
        tracing::debug!(
            record = handle.name(),
            table = %model.table_name(),
            columns = model.columns().len(),
            "stratum model built"
        );

        let mut models = self.models.write();
        Ok(models.entry(handle.id()).or_insert(model).clone())
    }

    pub fn model<T: RecordType>(&self) -> Result<Arc<Model>, ModelError> {
        self.get(TypeHandle::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// Columns read by selecting `handle` together with its eager joins, in row order.
    pub fn row_columns(&self, handle: TypeHandle) -> Result<Vec<RowColumn>, ModelError> {
        let mut out = Vec::new();
        self.collect_row(handle, &[], &mut vec![(handle, String::new())], &mut out)?;
        Ok(out)
    }

    fn collect_row(
        &self,
        handle: TypeHandle,
        table_path: &[usize],
        stack: &mut Vec<(TypeHandle, String)>,
        out: &mut Vec<RowColumn>,
    ) -> Result<(), ModelError> {
        let model = self.get(handle)?;
        let mut joined: Option<&[usize]> = None;
        for column in model.columns() {
            match column.foreign_key {
                Some(ForeignKey {
                    target,
                    lazy: false,
                }) => {
                    if joined == Some(column.path.as_slice()) {
                        continue;
                    }
                    joined = Some(column.path.as_slice());
                    if stack.iter().any(|(ty, _)| *ty == target) {
                        return Err(ModelError::Cycle {
                            path: cycle_path(stack, &column.name, target),
                        });
                    }
                    let mut path = table_path.to_vec();
                    path.extend_from_slice(&column.path);
                    stack.push((target, column.name.clone()));
                    let collected = self.collect_row(target, &path, stack, out);
                    stack.pop();
                    collected?;
                }
                _ => out.push(RowColumn {
                    table_path: table_path.to_vec(),
                    record: handle,
                    name: column.name.clone(),
                    sql_type: column.sql_type,
                }),
            }
        }
        Ok(())
    }
}
