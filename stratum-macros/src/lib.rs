use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, LitStr, parse_macro_input};

mod attrs;

use attrs::{ContainerAttrs, FieldAttrs};

/// Derives `Record` and `RecordType` from a struct with named fields.
///
/// Container attributes: `#[stratum(table = "name")]`, `#[stratum(projection)]`,
/// `#[stratum(inline)]`.
///
/// Field attributes: `id`, `id = "identity" | "none"`, `sequence = "seq"`,
/// `foreign_key`, `inline`, `version`, `column = "name"` (repeatable), `json`,
/// `convert = "name"`, `insertable = false`, `updatable = false`, `immutable`
/// and `ignore`.
#[proc_macro_derive(Record, attributes(stratum))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_record_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn derive_record_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Stratum Record does not support generic structs",
        ));
    }
    let container = ContainerAttrs::parse(&input.attrs)?;
    let fields = named_fields(input)?;

    let mut mapped = Vec::new();
    let mut ignored = Vec::new();
    for field in fields {
        let attrs = FieldAttrs::parse(&field.attrs)?;
        if attrs.ignore {
            ignored.push(field);
        } else {
            mapped.push((field, attrs));
        }
    }

    let record_impl = generate_record_impl(input, &mapped);
    let record_type_impl = generate_record_type_impl(input, &container, &mapped, &ignored);
    let field_value_impl = if container.is_inline() {
        let ident = &input.ident;
        quote! { ::stratum_core::record_field_value!(#ident); }
    } else {
        quote! {}
    };

    Ok(quote! {
        #record_impl
        #record_type_impl
        #field_value_impl
    })
}

fn named_fields(input: &DeriveInput) -> syn::Result<Vec<&Field>> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "Stratum Record only supports structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &data.fields,
            "Stratum Record only supports structs with named fields",
        ));
    };
    Ok(fields.named.iter().collect())
}

fn generate_record_impl(
    input: &DeriveInput,
    mapped: &[(&Field, FieldAttrs)],
) -> proc_macro2::TokenStream {
    let struct_name = &input.ident;
    let idents: Vec<_> = mapped.iter().map(|(field, _)| &field.ident).collect();
    let indices: Vec<_> = (0..mapped.len()).collect();

    quote! {
        impl ::stratum_core::record::Record for #struct_name {
            fn handle(&self) -> ::stratum_core::record::TypeHandle {
                ::stratum_core::record::TypeHandle::of::<Self>()
            }

            fn field(&self, index: usize) -> ::core::option::Option<::stratum_core::record::FieldRef<'_>> {
                match index {
                    #( #indices => ::core::option::Option::Some(
                        ::stratum_core::record::FieldValue::to_field(&self.#idents)
                    ), )*
                    _ => ::core::option::Option::None,
                }
            }
        }
    }
}

fn generate_record_type_impl(
    input: &DeriveInput,
    container: &ContainerAttrs,
    mapped: &[(&Field, FieldAttrs)],
    ignored: &[&Field],
) -> proc_macro2::TokenStream {
    let struct_name = &input.ident;
    let name = LitStr::new(&struct_name.to_string(), struct_name.span());
    let kind = container.kind_tokens();
    let record_annotations = container.annotation_tokens();

    let specs = mapped.iter().map(|(field, attrs)| {
        let ty = &field.ty;
        let field_name = field_name(field);
        let annotations = attrs.annotation_tokens();
        let immutable = attrs.immutable.then(|| quote! { .immutable() });
        quote! {
            ::stratum_core::record::FieldSpec::of::<#ty>(#field_name)
                #( .annotate(#annotations) )*
                #immutable
        }
    });

    let mapped_idents: Vec<_> = mapped.iter().map(|(field, _)| &field.ident).collect();
    let mapped_names: Vec<_> = mapped.iter().map(|(field, _)| field_name(field)).collect();
    let ignored_idents: Vec<_> = ignored.iter().map(|field| &field.ident).collect();
    let count = mapped.len();

    quote! {
        impl ::stratum_core::record::RecordType for #struct_name {
            const NAME: &'static str = #name;

            fn describe() -> ::stratum_core::record::RecordDescriptor {
                ::stratum_core::record::RecordDescriptor::new(Self::NAME, #kind)
                    #( .annotate(#record_annotations) )*
                    #( .field(#specs) )*
            }

            fn construct(
                values: ::std::vec::Vec<::stratum_core::value::Value>,
            ) -> ::core::result::Result<Self, ::stratum_core::error::MappingError> {
                let mut args = ::stratum_core::record::ConstructArgs::new(Self::NAME, values, #count)?;
                ::core::result::Result::Ok(Self {
                    #( #mapped_idents: args.take(#mapped_names)?, )*
                    #( #ignored_idents: ::core::default::Default::default(), )*
                })
            }
        }
    }
}

fn field_name(field: &Field) -> LitStr {
    let ident = field
        .ident
        .as_ref()
        .map(|ident| ident.to_string())
        .unwrap_or_default();
    let name = ident.strip_prefix("r#").unwrap_or(&ident).to_owned();
    LitStr::new(&name, proc_macro2::Span::call_site())
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    fn expand(input: DeriveInput) -> String {
        derive_record_impl(&input).unwrap().to_string()
    }

    #[test]
    fn generates_descriptor_and_accessors() {
        let tokens = expand(parse_quote! {
            struct City {
                #[stratum(id)]
                id: i32,
                name: String,
            }
        });
        assert!(tokens.contains("impl :: stratum_core :: record :: Record for City"));
        assert!(tokens.contains("const NAME : & 'static str = \"City\""));
        assert!(tokens.contains("RecordKind :: Table"));
        assert!(tokens.contains("Generation :: Identity"));
        assert!(tokens.contains("0usize => :: core :: option :: Option :: Some"));
        assert!(tokens.contains("args . take (\"name\")"));
        assert!(tokens.contains("ConstructArgs :: new (Self :: NAME , values , 2usize)"));
    }

    #[test]
    fn field_annotations_are_forwarded() {
        let tokens = expand(parse_quote! {
            #[stratum(table = "pets")]
            struct Pet {
                #[stratum(id, sequence = "pet_seq")]
                id: i64,
                #[stratum(foreign_key, column = "type_id")]
                pet_type: Arc<PetType>,
                #[stratum(version)]
                version: i32,
                #[stratum(json, updatable = false)]
                tags: serde_json::Value,
                #[stratum(convert = "lat_lon", immutable)]
                location: String,
            }
        });
        assert!(tokens.contains("Annotation :: DbTable (\"pets\")"));
        assert!(tokens.contains("Generation :: Sequence (\"pet_seq\")"));
        assert!(tokens.contains("Annotation :: ForeignKey"));
        assert!(tokens.contains("Annotation :: DbColumn (\"type_id\")"));
        assert!(tokens.contains("Annotation :: Version"));
        assert!(tokens.contains("Annotation :: Json"));
        assert!(tokens.contains("insertable : true , updatable : false"));
        assert!(tokens.contains("Annotation :: Convert (\"lat_lon\")"));
        assert!(tokens.contains(". immutable ()"));
    }

    #[test]
    fn repeated_column_names_become_a_container() {
        let tokens = expand(parse_quote! {
            struct Clinic {
                #[stratum(id = "none")]
                id: i32,
                #[stratum(convert = "lat_lon", column = "lat", column = "lon")]
                location: String,
            }
        });
        assert!(tokens.contains("Generation :: None"));
        assert!(tokens.contains("Annotation :: Repeated"));
        assert!(tokens.contains("DbColumn (\"lat\")"));
        assert!(tokens.contains("DbColumn (\"lon\")"));
    }

    #[test]
    fn ignored_fields_are_defaulted() {
        let tokens = expand(parse_quote! {
            struct Owner {
                #[stratum(id)]
                id: i32,
                #[stratum(ignore)]
                cached_label: Option<String>,
            }
        });
        assert!(tokens.contains("cached_label : :: core :: default :: Default :: default ()"));
        assert!(!tokens.contains("\"cached_label\""));
        assert!(tokens.contains("1usize"));
    }

    #[test]
    fn inline_records_get_a_field_value_impl() {
        let tokens = expand(parse_quote! {
            #[stratum(inline)]
            struct Address {
                street: String,
            }
        });
        assert!(tokens.contains("RecordKind :: Inline"));
        assert!(tokens.contains("record_field_value ! (Address)"));
    }

    #[test]
    fn projections_are_read_only_kinds() {
        let tokens = expand(parse_quote! {
            #[stratum(projection, table = "owner")]
            struct OwnerView {
                id: i32,
            }
        });
        assert!(tokens.contains("RecordKind :: Projection"));
        assert!(!tokens.contains("record_field_value"));
    }

    #[test]
    fn rejects_tuple_struct() {
        let input: DeriveInput = parse_quote! {
            struct City(i32, String);
        };
        let err = derive_record_impl(&input).unwrap_err();
        assert!(err.to_string().contains("named fields"));
    }

    #[test]
    fn rejects_non_struct() {
        let input: DeriveInput = parse_quote! {
            enum City {
                A,
                B,
            }
        };
        let err = derive_record_impl(&input).unwrap_err();
        assert!(err.to_string().contains("only supports structs"));
    }

    #[test]
    fn rejects_unknown_attributes() {
        let input: DeriveInput = parse_quote! {
            struct City {
                #[stratum(primary)]
                id: i32,
            }
        };
        let err = derive_record_impl(&input).unwrap_err();
        assert!(err.to_string().contains("unknown stratum attribute"));
    }
}
