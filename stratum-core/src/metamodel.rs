//! Typed field paths over record graphs.
//!
//! A [`Metamodel`] is the resolved form of a dotted path such as
//! `"owner.address.city"`. It walks inline records and eager foreign keys,
//! never through a lazy [`Ref`](crate::record::Ref), and can be used as a
//! map key: resolving the same string twice gives equal descriptors.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::annotation::{AnnotationKind, Annotations};
use crate::error::PathError;
use crate::model::{Field, FieldKind, ModelRegistry};
use crate::record::{FieldRef, Record, RecordType, TypeHandle, ValueType, field_refs_equal, records_equal};

#[derive(Clone)]
pub struct Metamodel {
    root: TypeHandle,
    hops: Vec<Arc<Field>>,
    /// Primary-key position of the record found at this path, if any.
    key_index: Option<usize>,
}

fn key_index(handle: TypeHandle) -> Option<usize> {
    handle
        .describe()
        .fields
        .iter()
        .position(|spec| Annotations::from(spec.annotations.clone()).has(AnnotationKind::PrimaryKey))
}

impl Metamodel {
    /// Zero-hop path standing for the root record itself.
    pub fn root(handle: TypeHandle) -> Self {
        Self {
            root: handle,
            hops: Vec::new(),
            key_index: key_index(handle),
        }
    }

    pub fn resolve(
        registry: &ModelRegistry,
        root: TypeHandle,
        dotted: &str,
    ) -> Result<Self, PathError> {
        if dotted.trim().is_empty() {
            return Err(PathError::Empty {
                type_name: root.name().to_owned(),
            });
        }

        let model = registry.get(root)?;
        let mut candidates: Vec<Arc<Field>> = model.fields().to_vec();
        let mut searched = root;
        let mut hops: Vec<Arc<Field>> = Vec::new();

        for segment in dotted.split('.') {
            if let Some(previous) = hops.last() {
                let blocked = |through_ref: bool| {
                    let segment = segment.to_owned();
                    let type_name = previous.owner.name().to_owned();
                    let field = previous.name.to_owned();
                    if through_ref {
                        PathError::ThroughRef {
                            segment,
                            type_name,
                            field,
                        }
                    } else {
                        PathError::NotARecord {
                            segment,
                            type_name,
                            field,
                        }
                    }
                };
                match &previous.kind {
                    FieldKind::Scalar => return Err(blocked(false)),
                    FieldKind::ForeignKey { lazy: true, .. } => return Err(blocked(true)),
                    FieldKind::ForeignKey { target, .. } => {
                        searched = *target;
                        candidates = registry.get(*target)?.fields().to_vec();
                    }
                    FieldKind::Inline { fields } => {
                        searched = previous.target().unwrap_or(searched);
                        candidates = fields.clone();
                    }
                }
            }

            let field = candidates
                .iter()
                .find(|field| field.name == segment)
                .cloned()
                .ok_or_else(|| PathError::UnknownField {
                    segment: segment.to_owned(),
                    type_name: searched.name().to_owned(),
                })?;
            hops.push(field);
        }

        let key_index = match hops.last().map(|leaf| &leaf.kind) {
            Some(FieldKind::ForeignKey { key, .. }) => Some(key.index),
            Some(FieldKind::Inline { .. }) => hops.last().and_then(|leaf| leaf.target()).and_then(key_index),
            _ => None,
        };

        Ok(Self {
            root,
            hops,
            key_index,
        })
    }

    pub fn resolve_for<T: RecordType>(
        registry: &ModelRegistry,
        dotted: &str,
    ) -> Result<Self, PathError> {
        Self::resolve(registry, TypeHandle::of::<T>(), dotted)
    }

    pub fn root_type(&self) -> TypeHandle {
        self.root
    }

    /// Dot-joined names of the intermediate hops; empty for a direct child.
    pub fn path(&self) -> String {
        let intermediate = self.hops.len().saturating_sub(1);
        self.hops[..intermediate]
            .iter()
            .map(|field| field.name)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Leaf field name; empty for the root.
    pub fn field_name(&self) -> &'static str {
        self.hops.last().map_or("", |field| field.name)
    }

    pub fn leaf(&self) -> Option<&Arc<Field>> {
        self.hops.last()
    }

    pub fn hops(&self) -> &[Arc<Field>] {
        &self.hops
    }

    pub fn depth(&self) -> usize {
        self.hops.len()
    }

    pub fn is_root(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn field_type(&self) -> ValueType {
        self.hops
            .last()
            .map_or(ValueType::Record(self.root), |field| field.value_type)
    }

    /// True for scalar, foreign-key and `Ref` leaves; inline records and the root are not columns.
    pub fn is_column(&self) -> bool {
        self.hops.last().is_some_and(|field| !field.is_inline())
    }

    /// The same path without its last hop; the root is its own parent.
    pub fn parent(&self) -> Metamodel {
        if self.hops.is_empty() {
            return self.clone();
        }
        let hops = self.hops[..self.hops.len() - 1].to_vec();
        let key_index = match hops.last() {
            None => key_index(self.root),
            Some(field) => match &field.kind {
                FieldKind::ForeignKey { key, .. } => Some(key.index),
                _ => field.target().and_then(key_index),
            },
        };
        Metamodel {
            root: self.root,
            hops,
            key_index,
        }
    }

    /// Position of the table holding this path's columns.
    pub fn table(&self) -> Metamodel {
        let mut table = self.parent();
        while table.leaf().is_some_and(|field| field.is_inline()) {
            table = table.parent();
        }
        table
    }

    /// Record type of the table returned by [`Metamodel::table`].
    pub fn table_type(&self) -> TypeHandle {
        let table = self.table();
        table
            .leaf()
            .and_then(|field| field.target())
            .unwrap_or(self.root)
    }

    pub(crate) fn indexes(&self) -> Vec<usize> {
        self.hops.iter().map(|field| field.index).collect()
    }

    /// Field indexes from the root to the table position.
    pub(crate) fn table_path(&self) -> Vec<usize> {
        self.table().indexes()
    }

    /// Field indexes from the table position to the leaf, as in [`crate::model::Column::path`].
    pub(crate) fn column_path(&self) -> Vec<usize> {
        let depth = self.table().depth();
        self.hops[depth..].iter().map(|field| field.index).collect()
    }

    /// Value at this position inside `instance`; `None` when an intermediate record is absent.
    pub fn navigate<'a>(&self, instance: &'a dyn Record) -> Option<FieldRef<'a>> {
        if instance.handle() != self.root {
            return None;
        }
        let mut current = FieldRef::Record(instance);
        for field in &self.hops {
            let FieldRef::Record(record) = current else {
                return None;
            };
            current = record.field(field.index)?;
        }
        match current {
            FieldRef::Null => None,
            other => Some(other),
        }
    }

    /// Compares only the primary-key values of the records at this position.
    ///
    /// Records without a key compare structurally and scalars by value.
    pub fn is_same(&self, a: &dyn Record, b: &dyn Record) -> bool {
        match (self.navigate(a), self.navigate(b)) {
            (None, None) => true,
            (Some(x), Some(y)) => self.same_value(&x, &y),
            _ => false,
        }
    }

    fn same_value(&self, x: &FieldRef<'_>, y: &FieldRef<'_>) -> bool {
        match (x, y) {
            (FieldRef::Record(x), FieldRef::Record(y)) => {
                if x.handle() != y.handle() {
                    return false;
                }
                match self.key_index {
                    Some(index) => match (x.field(index), y.field(index)) {
                        (Some(kx), Some(ky)) => field_refs_equal(&kx, &ky),
                        _ => false,
                    },
                    None => records_equal(*x, *y),
                }
            }
            (FieldRef::Ref(id), FieldRef::Record(record))
            | (FieldRef::Record(record), FieldRef::Ref(id)) => self
                .key_index
                .and_then(|index| record.field(index))
                .is_some_and(|key| field_refs_equal(&key, &FieldRef::from_value(id))),
            (x, y) => field_refs_equal(x, y),
        }
    }

    /// True when both positions hold the very same record instance.
    pub fn is_identical(&self, a: &dyn Record, b: &dyn Record) -> bool {
        match (self.navigate(a), self.navigate(b)) {
            (None, None) => true,
            (Some(FieldRef::Record(x)), Some(FieldRef::Record(y))) => {
                std::ptr::addr_eq(x as *const dyn Record, y as *const dyn Record)
            }
            (Some(x), Some(y)) => field_refs_equal(&x, &y),
            _ => false,
        }
    }
}

impl PartialEq for Metamodel {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.hops.len() == other.hops.len()
            && self
                .hops
                .iter()
                .zip(&other.hops)
                .all(|(a, b)| a.owner == b.owner && a.index == b.index)
    }
}

impl Eq for Metamodel {}

impl Hash for Metamodel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        for field in &self.hops {
            field.owner.hash(state);
            field.index.hash(state);
        }
    }
}

impl fmt::Display for Metamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root.name())?;
        for field in &self.hops {
            write!(f, ".{}", field.name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Metamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metamodel({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, City, Owner, Pet, Staff};
    use std::collections::HashSet;

    fn resolve<T: RecordType>(registry: &ModelRegistry, dotted: &str) -> Metamodel {
        Metamodel::resolve_for::<T>(registry, dotted).unwrap()
    }

    #[test]
    fn resolving_twice_gives_equal_paths() {
        let registry = ModelRegistry::default();
        let a = resolve::<Pet>(&registry, "owner.address.city.name");
        let b = resolve::<Pet>(&registry, "owner.address.city.name");
        assert_eq!(a, b);
        let set: HashSet<Metamodel> = [a.clone(), b].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(a.path(), "owner.address.city");
        assert_eq!(a.field_name(), "name");
        assert_eq!(a.to_string(), "Pet.owner.address.city.name");
    }

    #[test]
    fn inline_records_are_not_columns() {
        let registry = ModelRegistry::default();
        assert!(resolve::<Owner>(&registry, "first_name").is_column());
        assert!(resolve::<Owner>(&registry, "address.city").is_column());
        assert!(!resolve::<Owner>(&registry, "address").is_column());
        assert!(!Metamodel::root(TypeHandle::of::<Owner>()).is_column());
    }

    #[test]
    fn table_ascends_through_inline_records() {
        let registry = ModelRegistry::default();
        let city = resolve::<Owner>(&registry, "address.city");
        assert!(city.table().is_root());
        assert_eq!(city.table_type(), TypeHandle::of::<Owner>());
        assert_eq!(city.column_path(), vec![3, 1]);

        let name = resolve::<Pet>(&registry, "owner.address.city.name");
        assert_eq!(name.table_type(), TypeHandle::of::<City>());
        assert_eq!(name.table_path(), vec![4, 3, 1]);
        assert_eq!(name.column_path(), vec![1]);

        let root = Metamodel::root(TypeHandle::of::<Pet>());
        assert_eq!(root.table(), root);
    }

    #[test]
    fn errors_name_segment_and_type() {
        let registry = ModelRegistry::default();
        let err = Metamodel::resolve_for::<Owner>(&registry, "addres").unwrap_err();
        assert_eq!(err.to_string(), "No field named 'addres' on type Owner");

        let err = Metamodel::resolve_for::<Owner>(&registry, "address.zip").unwrap_err();
        assert_eq!(err.to_string(), "No field named 'zip' on type Address");

        assert!(matches!(
            Metamodel::resolve_for::<Owner>(&registry, "first_name.length"),
            Err(PathError::NotARecord { .. })
        ));
        assert!(matches!(
            Metamodel::resolve_for::<Owner>(&registry, " "),
            Err(PathError::Empty { .. })
        ));
    }

    #[test]
    fn refs_end_paths() {
        let registry = ModelRegistry::default();
        assert!(resolve::<Staff>(&registry, "manager").is_column());
        assert!(matches!(
            Metamodel::resolve_for::<Staff>(&registry, "manager.name"),
            Err(PathError::ThroughRef { .. })
        ));
    }

    #[test]
    fn same_compares_keys_identical_compares_instances() {
        let registry = ModelRegistry::default();
        let path = resolve::<Pet>(&registry, "owner");
        let city = Arc::new(City::new(1, "Madison"));
        let george = Arc::new(fixtures::owner(5, "George", city.clone()));
        let also_five = Arc::new(fixtures::owner(5, "Betty", city));

        let a = fixtures::pet(1, "Leo", Some(george.clone()));
        let b = fixtures::pet(2, "Basil", Some(also_five));
        assert!(path.is_same(&a, &b));
        assert!(!path.is_identical(&a, &b));

        let c = fixtures::pet(3, "Rosy", Some(george));
        assert!(path.is_same(&a, &c));
        assert!(path.is_identical(&a, &c));
    }

    #[test]
    fn scalars_compare_by_value() {
        let registry = ModelRegistry::default();
        let path = resolve::<Pet>(&registry, "owner.address.city.name");
        let madison = Arc::new(City::new(1, "Madison"));
        let a = fixtures::pet(1, "Leo", Some(Arc::new(fixtures::owner(5, "George", madison.clone()))));
        let b = fixtures::pet(2, "Basil", Some(Arc::new(fixtures::owner(6, "Betty", madison))));
        assert!(path.is_same(&a, &b));
        assert!(path.is_identical(&a, &b));
    }

    #[test]
    fn navigation_stops_at_absent_records() {
        let registry = ModelRegistry::default();
        let path = resolve::<Pet>(&registry, "owner.first_name");
        let stray = fixtures::pet(1, "Leo", None);
        assert!(path.navigate(&stray).is_none());

        let owned = fixtures::pet(
            2,
            "Basil",
            Some(Arc::new(fixtures::owner(5, "George", Arc::new(City::new(1, "Madison"))))),
        );
        assert!(!path.is_same(&stray, &owned));
        assert!(matches!(
            path.navigate(&owned),
            Some(FieldRef::Value(value)) if value == crate::value::Value::from("George")
        ));
    }
}
