//! Hand-written records shared by unit tests.

use std::sync::Arc;

use crate::annotation::{Annotation, Generation};
use crate::converter::{ConvertContext, Converter};
use crate::error::{ConvertError, MappingError};
use crate::record::{
    ConstructArgs, FieldRef, FieldSpec, FieldValue, Record, RecordDescriptor, RecordKind,
    RecordType, Ref, TypeHandle,
};
use crate::value::{BindValue, SqlType, Value};

macro_rules! fixture {
    (
        $(#[$meta:meta])*
        $ty:ident: $kind:ident [$($ann:expr),* $(,)?] {
            $($field:ident: $fty:ty $([$($fann:expr),* $(,)?])?),* $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $ty {
            $(pub $field: $fty),*
        }

        impl Record for $ty {
            fn handle(&self) -> TypeHandle {
                TypeHandle::of::<Self>()
            }

            fn field(&self, index: usize) -> Option<FieldRef<'_>> {
                let fields = [$(self.$field.to_field()),*];
                fields.into_iter().nth(index)
            }
        }

        impl RecordType for $ty {
            const NAME: &'static str = stringify!($ty);

            fn describe() -> RecordDescriptor {
                RecordDescriptor::new(Self::NAME, RecordKind::$kind)
                    $(.annotate($ann))*
                    $(.field(FieldSpec::of::<$fty>(stringify!($field)) $($(.annotate($fann))*)?))*
            }

            fn construct(values: Vec<Value>) -> Result<Self, MappingError> {
                let names = [$(stringify!($field)),*];
                let mut args = ConstructArgs::new(Self::NAME, values, names.len())?;
                Ok(Self {
                    $($field: args.take(stringify!($field))?),*
                })
            }
        }
    };
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    City: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        name: String,
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Address: Inline [] {
        address: String,
        city: Arc<City> [Annotation::ForeignKey],
    }
}

crate::record_field_value!(Address);

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Owner: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        first_name: String,
        last_name: String,
        address: Address [Annotation::Inline],
        telephone: Option<String>,
        version: i32 [Annotation::Version],
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    PetType: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        name: String,
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Pet: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        name: String,
        birth_date: Option<String>,
        pet_type: Arc<PetType> [Annotation::ForeignKey, Annotation::DbColumn("type_id")],
        owner: Option<Arc<Owner>> [Annotation::ForeignKey],
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Visit: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Sequence("visit_seq"))],
        visit_date: String,
        description: Option<String>,
        pet: Arc<Pet> [Annotation::ForeignKey],
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    VetSpecialtyPk: Inline [] {
        vet_id: i32,
        specialty_id: i32,
    }
}

crate::record_field_value!(VetSpecialtyPk);

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    VetSpecialty: Table [] {
        id: VetSpecialtyPk [Annotation::PrimaryKey(Generation::None), Annotation::Inline],
        note: Option<String>,
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    SpecialtyNote: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        specialty: Arc<VetSpecialty> [Annotation::ForeignKey],
    }
}

fixture! {
    #[derive(Debug, Clone)]
    OwnerView: Projection [Annotation::DbTable("owner")] {
        id: i32,
        first_name: String,
        last_name: String,
    }
}

fixture! {
    #[derive(Debug, Clone)]
    Employee: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        name: String,
        manager: Option<Arc<Employee>> [Annotation::ForeignKey],
    }
}

fixture! {
    #[derive(Debug, Clone)]
    Staff: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        name: String,
        manager: Option<Ref<Staff>> [Annotation::ForeignKey],
    }
}

fixture! {
    #[derive(Debug, Clone)]
    Booking: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        pet: Ref<Pet> [Annotation::ForeignKey],
        note: Option<String>,
    }
}

fixture! {
    #[derive(Debug, Clone)]
    Link: Inline [] {
        label: String,
        next: Option<Arc<Link>> [Annotation::Inline],
    }
}

fixture! {
    #[derive(Debug, Clone)]
    Chain: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        link: Arc<Link> [Annotation::Inline],
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Clinic: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::None)],
        name: String,
        location: String [Annotation::Convert("lat_lon")],
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Contact: Inline [] {
        email: Option<String>,
        phone: Option<String>,
    }
}

crate::record_field_value!(Contact);

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Person: Table [] {
        id: i32 [Annotation::PrimaryKey(Generation::Identity)],
        contact: Contact [Annotation::Inline],
    }
}

fixture! {
    #[derive(Debug, Clone, PartialEq)]
    Ticket: Table [] {
        id: i32 [
            Annotation::PrimaryKey(Generation::Identity),
            Annotation::PrimaryKey(Generation::None),
        ],
        subject: String,
    }
}

impl City {
    pub fn new(id: i32, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
        }
    }
}

pub fn owner(id: i32, first_name: &str, city: Arc<City>) -> Owner {
    Owner {
        id,
        first_name: first_name.to_owned(),
        last_name: "Franklin".to_owned(),
        address: Address {
            address: "110 W. Liberty St.".to_owned(),
            city,
        },
        telephone: None,
        version: 1,
    }
}

pub fn pet(id: i32, name: &str, owner: Option<Arc<Owner>>) -> Pet {
    Pet {
        id,
        name: name.to_owned(),
        birth_date: Some("2020-09-07".to_owned()),
        pet_type: Arc::new(PetType {
            id: 1,
            name: "cat".to_owned(),
        }),
        owner,
    }
}

/// Stores `"lat,lon"` text as two floating point columns.
#[derive(Debug, Clone, Copy)]
pub struct LatLonConverter;

impl Converter for LatLonConverter {
    fn name(&self) -> &str {
        "lat_lon"
    }

    fn parameter_types(&self) -> &[SqlType] {
        &[SqlType::Float, SqlType::Float]
    }

    fn to_database(&self, value: &Value) -> Result<Vec<BindValue>, ConvertError> {
        let Value::Text(text) = value else {
            return Err(ConvertError::new("coordinates must be text"));
        };
        let (lat, lon) = text
            .split_once(',')
            .ok_or_else(|| ConvertError::new(format!("missing ',' in '{text}'")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|err| ConvertError::with_source("invalid coordinate", err))
        };
        Ok(vec![BindValue::F64(parse(lat)?), BindValue::F64(parse(lon)?)])
    }

    fn from_database(
        &self,
        values: &[BindValue],
        context: &ConvertContext<'_>,
    ) -> Result<Value, ConvertError> {
        match values {
            [BindValue::F64(lat), BindValue::F64(lon)] => Ok(Value::Text(format!("{lat},{lon}"))),
            _ => Err(ConvertError::new(format!(
                "{}.{} expects two floats",
                context.type_name, context.field
            ))),
        }
    }
}
