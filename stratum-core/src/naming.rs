//! Physical names for tables and columns.
//!
//! Resolvers only see descriptors; explicit `DbTable`/`DbColumn` annotations
//! are applied by [`Naming`] before a resolver is consulted.

use std::fmt;
use std::sync::Arc;

use convert_case::{Case, Casing};

use crate::annotation::Annotations;
use crate::record::{FieldSpec, RecordDescriptor};

pub trait TableNameResolver: Send + Sync + fmt::Debug {
    fn resolve_table_name(&self, record: &RecordDescriptor) -> String;
}

pub trait ColumnNameResolver: Send + Sync + fmt::Debug {
    fn resolve_column_name(&self, field: &FieldSpec) -> String;
}

pub trait ForeignKeyResolver: Send + Sync + fmt::Debug {
    fn resolve_foreign_key_column_name(&self, field: &FieldSpec, target: &RecordDescriptor)
    -> String;
}

/// `PetType` -> `pet_type`, `firstName` -> `first_name`, foreign key `owner` -> `owner_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCase;

impl TableNameResolver for SnakeCase {
    fn resolve_table_name(&self, record: &RecordDescriptor) -> String {
        record.name.to_case(Case::Snake)
    }
}

impl ColumnNameResolver for SnakeCase {
    fn resolve_column_name(&self, field: &FieldSpec) -> String {
        field.name.to_case(Case::Snake)
    }
}

impl ForeignKeyResolver for SnakeCase {
    fn resolve_foreign_key_column_name(
        &self,
        field: &FieldSpec,
        _target: &RecordDescriptor,
    ) -> String {
        format!("{}_id", field.name.to_case(Case::Snake))
    }
}

/// Upper-cases whatever the wrapped resolver produces.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase<R>(pub R);

impl<R: TableNameResolver> TableNameResolver for Uppercase<R> {
    fn resolve_table_name(&self, record: &RecordDescriptor) -> String {
        self.0.resolve_table_name(record).to_uppercase()
    }
}

impl<R: ColumnNameResolver> ColumnNameResolver for Uppercase<R> {
    fn resolve_column_name(&self, field: &FieldSpec) -> String {
        self.0.resolve_column_name(field).to_uppercase()
    }
}

impl<R: ForeignKeyResolver> ForeignKeyResolver for Uppercase<R> {
    fn resolve_foreign_key_column_name(
        &self,
        field: &FieldSpec,
        target: &RecordDescriptor,
    ) -> String {
        self.0
            .resolve_foreign_key_column_name(field, target)
            .to_uppercase()
    }
}

/// The three resolvers used when building models.
#[derive(Debug, Clone)]
pub struct Naming {
    tables: Arc<dyn TableNameResolver>,
    columns: Arc<dyn ColumnNameResolver>,
    foreign_keys: Arc<dyn ForeignKeyResolver>,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            tables: Arc::new(SnakeCase),
            columns: Arc::new(SnakeCase),
            foreign_keys: Arc::new(SnakeCase),
        }
    }
}

impl Naming {
    pub fn uppercase() -> Self {
        Self {
            tables: Arc::new(Uppercase(SnakeCase)),
            columns: Arc::new(Uppercase(SnakeCase)),
            foreign_keys: Arc::new(Uppercase(SnakeCase)),
        }
    }

    pub fn with_tables(mut self, resolver: impl TableNameResolver + 'static) -> Self {
        self.tables = Arc::new(resolver);
        self
    }

    pub fn with_columns(mut self, resolver: impl ColumnNameResolver + 'static) -> Self {
        self.columns = Arc::new(resolver);
        self
    }

    pub fn with_foreign_keys(mut self, resolver: impl ForeignKeyResolver + 'static) -> Self {
        self.foreign_keys = Arc::new(resolver);
        self
    }

    pub fn table_name(&self, record: &RecordDescriptor, annotations: &Annotations) -> String {
        match annotations.table_name() {
            Some(name) => name.to_owned(),
            None => self.tables.resolve_table_name(record),
        }
    }

    pub fn column_name(&self, field: &FieldSpec, annotations: &Annotations) -> String {
        match annotations.column_names().as_slice() {
            [name] => (*name).to_owned(),
            _ => self.columns.resolve_column_name(field),
        }
    }

    pub fn foreign_key_column_name(
        &self,
        field: &FieldSpec,
        annotations: &Annotations,
        target: &RecordDescriptor,
    ) -> String {
        match annotations.column_names().as_slice() {
            [name] => (*name).to_owned(),
            _ => self
                .foreign_keys
                .resolve_foreign_key_column_name(field, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::record::RecordKind;

    fn descriptor(name: &'static str) -> RecordDescriptor {
        RecordDescriptor::new(name, RecordKind::Table)
    }

    #[test]
    fn snake_case_defaults() {
        let naming = Naming::default();
        let pet_type = descriptor("PetType");
        assert_eq!(
            naming.table_name(&pet_type, &Annotations::default()),
            "pet_type"
        );
        let field = FieldSpec::of::<String>("firstName");
        assert_eq!(
            naming.column_name(&field, &Annotations::default()),
            "first_name"
        );
        let owner = FieldSpec::of::<i32>("owner");
        assert_eq!(
            naming.foreign_key_column_name(&owner, &Annotations::default(), &descriptor("Owner")),
            "owner_id"
        );
    }

    #[test]
    fn annotations_win_over_resolvers() {
        let naming = Naming::uppercase();
        let annotations = Annotations::new(vec![Annotation::DbTable("pets")]);
        assert_eq!(naming.table_name(&descriptor("Pet"), &annotations), "pets");
        let field = FieldSpec::of::<i32>("petType");
        let column = Annotations::new(vec![Annotation::DbColumn("type_id")]);
        assert_eq!(
            naming.foreign_key_column_name(&field, &column, &descriptor("PetType")),
            "type_id"
        );
        assert_eq!(
            naming.foreign_key_column_name(&field, &Annotations::default(), &descriptor("PetType")),
            "PET_TYPE_ID"
        );
    }
}
