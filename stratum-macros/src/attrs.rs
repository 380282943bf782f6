//! `#[stratum(...)]` attribute parsing.

use proc_macro2::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{Attribute, LitBool, LitStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Kind {
    #[default]
    Table,
    Projection,
    Inline,
}

#[derive(Default)]
pub struct ContainerAttrs {
    kind: Kind,
    table: Option<LitStr>,
}

impl ContainerAttrs {
    pub fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("stratum")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    out.table = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("projection") {
                    out.set_kind(&meta, Kind::Projection)?;
                } else if meta.path.is_ident("inline") {
                    out.set_kind(&meta, Kind::Inline)?;
                } else {
                    return Err(unknown(&meta));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }

    fn set_kind(&mut self, meta: &ParseNestedMeta<'_>, kind: Kind) -> syn::Result<()> {
        if self.kind != Kind::Table {
            return Err(meta.error("a record is either a projection or inline, not both"));
        }
        self.kind = kind;
        Ok(())
    }

    pub fn is_inline(&self) -> bool {
        self.kind == Kind::Inline
    }

    pub fn kind_tokens(&self) -> TokenStream {
        match self.kind {
            Kind::Table => quote! { ::stratum_core::record::RecordKind::Table },
            Kind::Projection => quote! { ::stratum_core::record::RecordKind::Projection },
            Kind::Inline => quote! { ::stratum_core::record::RecordKind::Inline },
        }
    }

    pub fn annotation_tokens(&self) -> Vec<TokenStream> {
        self.table
            .iter()
            .map(|table| quote! { ::stratum_core::annotation::Annotation::DbTable(#table) })
            .collect()
    }
}

#[derive(Debug)]
enum Generation {
    Identity,
    Sequence(LitStr),
    None,
}

#[derive(Debug, Default)]
pub struct FieldAttrs {
    pub ignore: bool,
    pub immutable: bool,
    id: Option<Generation>,
    foreign_key: bool,
    inline: bool,
    version: bool,
    json: bool,
    columns: Vec<LitStr>,
    convert: Option<LitStr>,
    insertable: Option<bool>,
    updatable: Option<bool>,
}

impl FieldAttrs {
    pub fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = Self::default();
        let mut sequence: Option<LitStr> = None;
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("stratum")) {
            attr.parse_nested_meta(|meta| {
                let path = &meta.path;
                if path.is_ident("id") {
                    out.id = Some(if meta.input.peek(syn::Token![=]) {
                        let strategy: LitStr = meta.value()?.parse()?;
                        match strategy.value().as_str() {
                            "identity" => Generation::Identity,
                            "none" => Generation::None,
                            _ => {
                                return Err(syn::Error::new_spanned(
                                    &strategy,
                                    "expected id = \"identity\" or id = \"none\"",
                                ));
                            }
                        }
                    } else {
                        Generation::Identity
                    });
                } else if path.is_ident("sequence") {
                    sequence = Some(meta.value()?.parse()?);
                } else if path.is_ident("foreign_key") {
                    out.foreign_key = true;
                } else if path.is_ident("inline") {
                    out.inline = true;
                } else if path.is_ident("version") {
                    out.version = true;
                } else if path.is_ident("json") {
                    out.json = true;
                } else if path.is_ident("column") {
                    out.columns.push(meta.value()?.parse()?);
                } else if path.is_ident("convert") {
                    out.convert = Some(meta.value()?.parse()?);
                } else if path.is_ident("insertable") {
                    out.insertable = Some(meta.value()?.parse::<LitBool>()?.value);
                } else if path.is_ident("updatable") {
                    out.updatable = Some(meta.value()?.parse::<LitBool>()?.value);
                } else if path.is_ident("immutable") {
                    out.immutable = true;
                } else if path.is_ident("ignore") {
                    out.ignore = true;
                } else {
                    return Err(unknown(&meta));
                }
                Ok(())
            })?;
        }

        if let Some(sequence) = sequence {
            match out.id {
                Some(Generation::None) => {
                    return Err(syn::Error::new_spanned(
                        &sequence,
                        "a sequence key cannot also be id = \"none\"",
                    ));
                }
                _ => out.id = Some(Generation::Sequence(sequence)),
            }
        }
        Ok(out)
    }

    pub fn annotation_tokens(&self) -> Vec<TokenStream> {
        let annotation = quote! { ::stratum_core::annotation::Annotation };
        let mut out = Vec::new();

        if let Some(generation) = &self.id {
            let generation = match generation {
                Generation::Identity => {
                    quote! { ::stratum_core::annotation::Generation::Identity }
                }
                Generation::Sequence(name) => {
                    quote! { ::stratum_core::annotation::Generation::Sequence(#name) }
                }
                Generation::None => quote! { ::stratum_core::annotation::Generation::None },
            };
            out.push(quote! { #annotation::PrimaryKey(#generation) });
        }
        if self.foreign_key {
            out.push(quote! { #annotation::ForeignKey });
        }
        if self.inline {
            out.push(quote! { #annotation::Inline });
        }
        if self.version {
            out.push(quote! { #annotation::Version });
        }
        if self.json {
            out.push(quote! { #annotation::Json });
        }
        match self.columns.as_slice() {
            [] => {}
            [column] => out.push(quote! { #annotation::DbColumn(#column) }),
            columns => {
                let names = columns
                    .iter()
                    .map(|column| quote! { #annotation::DbColumn(#column) });
                out.push(quote! { #annotation::Repeated(::std::vec![ #( #names ),* ]) });
            }
        }
        if let Some(converter) = &self.convert {
            out.push(quote! { #annotation::Convert(#converter) });
        }
        if self.insertable.is_some() || self.updatable.is_some() {
            let insertable = self.insertable.unwrap_or(true);
            let updatable = self.updatable.unwrap_or(true);
            out.push(quote! {
                #annotation::Persist { insertable: #insertable, updatable: #updatable }
            });
        }
        out
    }
}

fn unknown(meta: &ParseNestedMeta<'_>) -> syn::Error {
    let name = meta
        .path
        .get_ident()
        .map(ToString::to_string)
        .unwrap_or_default();
    meta.error(format!("unknown stratum attribute `{name}`"))
}
