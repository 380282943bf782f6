use std::iter;
use std::sync::Arc;

use crate::converter::ConvertContext;
use crate::error::{ConvertError, MappingError, ModelError};
use crate::model::{Field, FieldKind, Model, ModelRegistry};
use crate::record::{FieldRef, Record, RecordType, TypeHandle};
use crate::value::{BindValue, Value};

/// Converts record instances to ordered column values and back.
///
/// `map` follows the model's column layout. `unmap` follows the row layout
/// of `Select`, where eager foreign keys are read from their joined columns.
#[derive(Debug, Clone, Copy)]
pub struct ModelMapper<'r> {
    registry: &'r ModelRegistry,
}

fn converter_error(field: &Field, source: ConvertError) -> MappingError {
    MappingError::Converter {
        type_name: field.owner.name().to_owned(),
        field: field.name.to_owned(),
        source,
    }
}

fn null_field(field: &Field) -> MappingError {
    MappingError::NullField {
        type_name: field.owner.name().to_owned(),
        field: field.name.to_owned(),
    }
}

fn missing_field(field: &Field) -> MappingError {
    MappingError::MissingField {
        type_name: field.owner.name().to_owned(),
        index: field.index,
    }
}

impl<'r> ModelMapper<'r> {
    pub fn new(registry: &'r ModelRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r ModelRegistry {
        self.registry
    }

    /// Column values of `record` in the model's column order.
    pub fn map(&self, model: &Model, record: &dyn Record) -> Result<Vec<BindValue>, MappingError> {
        if record.handle() != model.handle() {
            return Err(MappingError::TypeMismatch {
                expected: model.name().to_owned(),
                found: record.handle().name().to_owned(),
            });
        }
        let mut out = Vec::with_capacity(model.columns().len());
        self.map_fields(model.fields(), record, &mut out)?;
        Ok(out)
    }

    /// Primary-key column values of `record`.
    pub fn map_key(
        &self,
        model: &Model,
        record: &dyn Record,
    ) -> Result<Vec<BindValue>, MappingError> {
        let key = model
            .primary_key()
            .ok_or_else(|| MappingError::NoPrimaryKey {
                type_name: model.name().to_owned(),
            })?;
        let value = record.field(key.index).ok_or_else(|| missing_field(key))?;
        let mut out = Vec::with_capacity(key.width());
        self.map_field(key, &value, &mut out)?;
        Ok(out)
    }

    fn map_fields(
        &self,
        fields: &[Arc<Field>],
        record: &dyn Record,
        out: &mut Vec<BindValue>,
    ) -> Result<(), MappingError> {
        for field in fields {
            let value = record.field(field.index).ok_or_else(|| missing_field(field))?;
            self.map_field(field, &value, out)?;
        }
        Ok(())
    }

    /// Column values of one field; `value` may also be a bare key for foreign keys.
    pub(crate) fn map_field(
        &self,
        field: &Field,
        value: &FieldRef<'_>,
        out: &mut Vec<BindValue>,
    ) -> Result<(), MappingError> {
        if value.is_null() {
            if !field.nullable {
                return Err(null_field(field));
            }
            out.extend(iter::repeat_n(BindValue::Null, field.width()));
            return Ok(());
        }

        match &field.kind {
            FieldKind::Scalar => {
                let scalar = match value {
                    FieldRef::Value(value) => value,
                    FieldRef::Ref(id) => *id,
                    FieldRef::Record(record) => {
                        return Err(MappingError::TypeMismatch {
                            expected: field.value_type.to_string(),
                            found: record.handle().name().to_owned(),
                        });
                    }
                    FieldRef::Null => return Err(null_field(field)),
                };
                let converter = field
                    .converter
                    .as_ref()
                    .ok_or_else(|| converter_error(field, ConvertError::new("no converter")))?;
                let binds = converter
                    .to_database(scalar)
                    .map_err(|source| converter_error(field, source))?;
                if binds.len() != field.columns.len() {
                    return Err(converter_error(
                        field,
                        ConvertError::new(format!(
                            "{} produced {} values for {} columns",
                            converter.name(),
                            binds.len(),
                            field.columns.len()
                        )),
                    ));
                }
                out.extend(binds);
                Ok(())
            }
            FieldKind::Inline { fields } => match value {
                FieldRef::Record(record) => self.map_fields(fields, *record, out),
                FieldRef::Value(Value::Record(record)) => {
                    self.map_fields(fields, record.as_ref(), out)
                }
                other => Err(MappingError::TypeMismatch {
                    expected: field.value_type.to_string(),
                    found: field_kind_name(other).to_owned(),
                }),
            },
            FieldKind::ForeignKey { key, .. } => match value {
                FieldRef::Record(record) => self.map_target_key(key, *record, out),
                FieldRef::Value(Value::Record(record)) => {
                    self.map_target_key(key, record.as_ref(), out)
                }
                FieldRef::Ref(id) => self.map_field(key, &FieldRef::from_value(id), out),
                scalar => self.map_field(key, scalar, out),
            },
        }
    }

    fn map_target_key(
        &self,
        key: &Field,
        target: &dyn Record,
        out: &mut Vec<BindValue>,
    ) -> Result<(), MappingError> {
        if target.handle() != key.owner {
            return Err(MappingError::TypeMismatch {
                expected: key.owner.name().to_owned(),
                found: target.handle().name().to_owned(),
            });
        }
        let value = target.field(key.index).ok_or_else(|| missing_field(key))?;
        self.map_field(key, &value, out)
    }

    /// Rebuilds a record from a row in `Select` layout.
    pub fn unmap(&self, model: &Model, values: &[BindValue]) -> Result<Arc<dyn Record>, MappingError> {
        let mut cursor = 0;
        let mut stack = vec![model.handle()];
        let record = self.read_record(
            model.handle(),
            model.fields(),
            values,
            &mut cursor,
            &mut stack,
        )?;
        if cursor != values.len() {
            return Err(MappingError::ArgumentCount {
                type_name: model.name().to_owned(),
                expected: cursor,
                actual: values.len(),
            });
        }
        Ok(record)
    }

    pub fn unmap_as<T: RecordType>(
        &self,
        model: &Model,
        values: &[BindValue],
    ) -> Result<Arc<T>, MappingError> {
        self.unmap(model, values)?
            .downcast_arc::<T>()
            .map_err(|_| MappingError::TypeMismatch {
                expected: T::NAME.to_owned(),
                found: model.name().to_owned(),
            })
    }

    /// Number of row values `unmap` reads for `model`.
    pub fn row_width(&self, model: &Model) -> Result<usize, MappingError> {
        let mut stack = vec![model.handle()];
        let mut width = 0;
        for field in model.fields() {
            width += self.field_row_width(field, &mut stack)?;
        }
        Ok(width)
    }

    fn field_row_width(
        &self,
        field: &Field,
        stack: &mut Vec<TypeHandle>,
    ) -> Result<usize, MappingError> {
        match &field.kind {
            FieldKind::Inline { fields } => {
                let mut width = 0;
                for child in fields {
                    width += self.field_row_width(child, stack)?;
                }
                Ok(width)
            }
            FieldKind::ForeignKey {
                target,
                lazy: false,
                ..
            } => {
                let model = self.enter(field, *target, stack)?;
                let width = model.fields().iter().try_fold(0, |width, child| {
                    Ok::<_, MappingError>(width + self.field_row_width(child, stack)?)
                });
                stack.pop();
                width
            }
            _ => Ok(field.columns.len()),
        }
    }

    /// Pushes `target` onto the join stack, rejecting cycles.
    fn enter(
        &self,
        field: &Field,
        target: TypeHandle,
        stack: &mut Vec<TypeHandle>,
    ) -> Result<Arc<Model>, MappingError> {
        if stack.contains(&target) {
            let mut path: Vec<&str> = stack.iter().map(|ty| ty.name()).collect();
            path.push(target.name());
            return Err(ModelError::Cycle {
                path: format!("{} via {}", path.join(" -> "), field.name),
            }
            .into());
        }
        let model = self.registry.get(target)?;
        stack.push(target);
        Ok(model)
    }

    fn read_record(
        &self,
        handle: TypeHandle,
        fields: &[Arc<Field>],
        values: &[BindValue],
        cursor: &mut usize,
        stack: &mut Vec<TypeHandle>,
    ) -> Result<Arc<dyn Record>, MappingError> {
        let mut args = Vec::with_capacity(fields.len());
        for field in fields {
            args.push(self.read_field(field, values, cursor, stack)?);
        }
        handle.construct(args)
    }

    fn read_field(
        &self,
        field: &Field,
        values: &[BindValue],
        cursor: &mut usize,
        stack: &mut Vec<TypeHandle>,
    ) -> Result<Value, MappingError> {
        let width = self.field_row_width(field, stack)?;
        let start = *cursor;
        let slice = values
            .get(start..start + width)
            .ok_or_else(|| missing_field(field))?;

        // Inline records have no key column, so an all-NULL slice is only
        // absent when the field itself may be absent.
        let inline = matches!(field.kind, FieldKind::Inline { .. });
        if slice.iter().all(BindValue::is_null) && (field.nullable || !inline) {
            *cursor += width;
            return if field.nullable {
                Ok(Value::Null)
            } else {
                Err(null_field(field))
            };
        }

        match &field.kind {
            FieldKind::Scalar => {
                *cursor += width;
                let converter = field
                    .converter
                    .as_ref()
                    .ok_or_else(|| converter_error(field, ConvertError::new("no converter")))?;
                let context = ConvertContext {
                    type_name: field.owner.name(),
                    field: field.name,
                };
                converter
                    .from_database(slice, &context)
                    .map_err(|source| converter_error(field, source))
            }
            FieldKind::Inline { fields } => {
                let target = field.target().ok_or_else(|| missing_field(field))?;
                let record = self.read_record(target, fields, values, cursor, stack)?;
                Ok(Value::Record(record))
            }
            FieldKind::ForeignKey {
                key, lazy: true, ..
            } => self.read_field(key, values, cursor, stack),
            FieldKind::ForeignKey {
                target,
                lazy: false,
                ..
            } => {
                let model = self.enter(field, *target, stack)?;
                let record = self.read_record(*target, model.fields(), values, cursor, stack);
                stack.pop();
                Ok(Value::Record(record?))
            }
        }
    }
}

fn field_kind_name(value: &FieldRef<'_>) -> &'static str {
    match value {
        FieldRef::Null => "NULL",
        FieldRef::Value(value) => value.kind_name(),
        FieldRef::Record(_) => "record",
        FieldRef::Ref(_) => "reference",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ConverterRegistry;
    use crate::fixtures::{
        self, Booking, City, Clinic, Contact, LatLonConverter, Owner, Person, Pet, Staff,
        VetSpecialty, VetSpecialtyPk,
    };
    use crate::naming::Naming;
    use crate::record::Ref;
    use std::error::Error as _;

    fn madison() -> Arc<City> {
        Arc::new(City::new(2, "Madison"))
    }

    #[test]
    fn maps_fields_in_column_order() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Owner>().unwrap();
        let owner = fixtures::owner(5, "George", madison());
        let values = mapper.map(&model, &owner).unwrap();
        assert_eq!(
            values,
            vec![
                BindValue::I64(5),
                BindValue::from("George"),
                BindValue::from("Franklin"),
                BindValue::from("110 W. Liberty St."),
                BindValue::I64(2),
                BindValue::Null,
                BindValue::I64(1),
            ]
        );
    }

    #[test]
    fn converter_arity_keeps_columns_aligned() {
        let mut converters = ConverterRegistry::default();
        converters.register(LatLonConverter);
        let registry = ModelRegistry::new(Naming::default(), converters, true);
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Clinic>().unwrap();
        let clinic = Clinic {
            id: 1,
            name: "East".to_owned(),
            location: "43.07,-89.4".to_owned(),
        };
        let values = mapper.map(&model, &clinic).unwrap();
        assert_eq!(values.len(), model.columns().len());
        assert_eq!(values[2], BindValue::F64(43.07));
        assert_eq!(values[3], BindValue::F64(-89.4));
    }

    #[test]
    fn converter_failures_keep_cause() {
        let mut converters = ConverterRegistry::default();
        converters.register(LatLonConverter);
        let registry = ModelRegistry::new(Naming::default(), converters, true);
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Clinic>().unwrap();
        let clinic = Clinic {
            id: 1,
            name: "East".to_owned(),
            location: "north,west".to_owned(),
        };
        let err = mapper.map(&model, &clinic).unwrap_err();
        assert_eq!(err.to_string(), "Converter failed for Clinic.location");
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "invalid coordinate");
        assert!(cause.source().is_some());
    }

    #[test]
    fn null_in_required_field_names_the_field() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Booking>().unwrap();
        let booking = Booking {
            id: 1,
            pet: Ref::new(Value::Null),
            note: None,
        };
        let err = mapper.map(&model, &booking).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Field Booking.pet is not nullable but holds NULL"
        );
    }

    #[test]
    fn keys_expand_composite_primary_keys() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<VetSpecialty>().unwrap();
        let specialty = VetSpecialty {
            id: VetSpecialtyPk {
                vet_id: 3,
                specialty_id: 9,
            },
            note: None,
        };
        assert_eq!(
            mapper.map_key(&model, &specialty).unwrap(),
            vec![BindValue::I64(3), BindValue::I64(9)]
        );
    }

    #[test]
    fn unmaps_joined_rows() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Pet>().unwrap();
        assert_eq!(mapper.row_width(&model).unwrap(), 13);

        let row = vec![
            BindValue::I64(7),
            BindValue::from("Leo"),
            BindValue::Null,
            BindValue::I64(1),
            BindValue::from("cat"),
            BindValue::I64(5),
            BindValue::from("George"),
            BindValue::from("Franklin"),
            BindValue::from("110 W. Liberty St."),
            BindValue::I64(2),
            BindValue::from("Madison"),
            BindValue::Null,
            BindValue::I64(3),
        ];
        let pet = mapper.unmap_as::<Pet>(&model, &row).unwrap();
        assert_eq!(pet.name, "Leo");
        assert_eq!(pet.birth_date, None);
        assert_eq!(pet.pet_type.name, "cat");
        let owner = pet.owner.as_ref().unwrap();
        assert_eq!(owner.address.city.name, "Madison");
        assert_eq!(owner.version, 3);
    }

    #[test]
    fn absent_left_joins_become_none() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Pet>().unwrap();
        let mut row = vec![
            BindValue::I64(7),
            BindValue::from("Leo"),
            BindValue::from("2020-09-07"),
            BindValue::I64(1),
            BindValue::from("cat"),
        ];
        row.extend(iter::repeat_n(BindValue::Null, 8));
        let pet = mapper.unmap_as::<Pet>(&model, &row).unwrap();
        assert!(pet.owner.is_none());
    }

    #[test]
    fn references_read_only_their_key() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Staff>().unwrap();
        let row = vec![BindValue::I64(2), BindValue::from("Ada"), BindValue::I64(1)];
        let staff = mapper.unmap_as::<Staff>(&model, &row).unwrap();
        let manager = staff.manager.as_ref().unwrap();
        assert_eq!(manager.id(), &Value::Int(1));
        assert!(!manager.is_loaded());
    }

    #[test]
    fn short_rows_are_rejected() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<City>().unwrap();
        let err = mapper.unmap(&model, &[BindValue::I64(1)]).unwrap_err();
        assert!(matches!(err, MappingError::MissingField { index: 1, .. }));
    }

    #[test]
    fn inline_records_with_only_null_members_round_trip() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<Person>().unwrap();
        let person = Person {
            id: 1,
            contact: Contact {
                email: None,
                phone: None,
            },
        };

        let values = mapper.map(&model, &person).unwrap();
        assert_eq!(values, vec![BindValue::I64(1), BindValue::Null, BindValue::Null]);
        let back = mapper.unmap_as::<Person>(&model, &values).unwrap();
        assert_eq!(*back, person);

        let row = vec![BindValue::I64(2), BindValue::Null, BindValue::from("555-0100")];
        let partial = mapper.unmap_as::<Person>(&model, &row).unwrap();
        assert_eq!(partial.contact.phone.as_deref(), Some("555-0100"));
        assert_eq!(partial.contact.email, None);
    }

    #[test]
    fn required_scalars_still_reject_null() {
        let registry = ModelRegistry::default();
        let mapper = ModelMapper::new(&registry);
        let model = registry.model::<City>().unwrap();
        let err = mapper
            .unmap(&model, &[BindValue::I64(1), BindValue::Null])
            .unwrap_err();
        assert!(err.to_string().contains("City.name"));
    }
}
