//! Proc macros binding Rust types to HDF5 compound and enumeration types.
//!
//! - `#[derive(H5Compound)]` on a struct with named fields generates the
//!   record accessors and the compound mapping, one member per field.
//! - `#[derive(H5Enum)]` on a fieldless enum generates an enumeration type
//!   whose values are the variant names, in declaration order.
//!
//! Field attributes (`#[h5(...)]`):
//! - `name = "..."`: member name (defaults to the field name)
//! - `len = N`: string length, array length or bit-field length in words
//! - `elem_len = N`: length of each string element of an array
//! - `bits = N`: bit-field length in bits
//! - `vlen`: variable-length string
//! - `timestamp`: `i64` milliseconds since the epoch
//! - `duration = "seconds"`: `i64` duration in the given unit
//! - `skip`: not stored; the field is filled with `Default::default()`

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitInt, LitStr};

#[derive(Default)]
struct FieldAttrs {
    name: Option<String>,
    len: Option<i64>,
    elem_len: Option<i64>,
    bits: Option<i64>,
    vlen: bool,
    timestamp: bool,
    duration: Option<syn::Ident>,
    skip: bool,
}

fn time_unit(lit: &LitStr) -> syn::Result<syn::Ident> {
    let unit = match lit.value().to_ascii_lowercase().as_str() {
        "us" | "micros" | "microseconds" => "Microseconds",
        "ms" | "millis" | "milliseconds" => "Milliseconds",
        "s" | "seconds" => "Seconds",
        "min" | "minutes" => "Minutes",
        "h" | "hours" => "Hours",
        "d" | "days" => "Days",
        other => {
            return Err(syn::Error::new_spanned(
                lit,
                format!("unknown duration unit `{other}`"),
            ))
        }
    };
    Ok(syn::Ident::new(unit, lit.span()))
}

fn parse_attrs(attrs: &[syn::Attribute]) -> syn::Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("h5")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                out.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("len") {
                out.len = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else if meta.path.is_ident("elem_len") {
                out.elem_len = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else if meta.path.is_ident("bits") {
                out.bits = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            } else if meta.path.is_ident("vlen") {
                out.vlen = true;
            } else if meta.path.is_ident("timestamp") {
                out.timestamp = true;
            } else if meta.path.is_ident("duration") {
                out.duration = Some(time_unit(&meta.value()?.parse::<LitStr>()?)?);
            } else if meta.path.is_ident("skip") {
                out.skip = true;
            } else {
                return Err(meta.error("unsupported h5 attribute"));
            }
            Ok(())
        })?;
    }
    Ok(out)
}

fn root() -> proc_macro2::TokenStream {
    quote! { ::rustyhdf5_typemap }
}

/// Derive `HostRecord`, `H5Compound` and `HostValue` for a struct.
///
/// Every field type must implement `HostValue` and `Default`.
#[proc_macro_derive(H5Compound, attributes(h5))]
pub fn derive_h5compound(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match impl_h5compound(&input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn impl_h5compound(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "H5Compound can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "H5Compound can only be derived for structs",
            ));
        }
    };
    let root = root();

    let mut index_arms = Vec::new();
    let mut get_arms = Vec::new();
    let mut set_arms = Vec::new();
    let mut template_items = Vec::new();
    let mut mapping_stmts = Vec::new();
    let mut to_value_stmts = Vec::new();
    let mut from_value_stmts = Vec::new();
    let mut fresh_fields = Vec::new();
    let mut stored = 0usize;

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ty = &field.ty;
        fresh_fields.push(quote! { #ident: ::core::default::Default::default() });

        let attrs = parse_attrs(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let field_str = ident.to_string();
        let member = attrs.name.clone().unwrap_or_else(|| field_str.clone());
        let index = stored;
        stored += 1;

        let mut hint = quote! { #root::MemberHint::default() };
        if let Some(len) = attrs.len {
            hint = quote! { #hint.len(#len) };
        }
        if let Some(len) = attrs.elem_len {
            hint = quote! { #hint.elem_len(#len) };
        }
        if let Some(bits) = attrs.bits {
            hint = quote! { #hint.bits(#bits) };
        }
        if attrs.vlen {
            hint = quote! { #hint.vlen() };
        }
        if attrs.timestamp {
            hint = quote! { #hint.timestamp() };
        }
        if let Some(unit) = &attrs.duration {
            hint = quote! { #hint.duration(#root::TimeUnit::#unit) };
        }

        index_arms.push(quote! { #field_str => ::core::option::Option::Some(#index), });
        get_arms.push(quote! {
            #root::AccessPath::Field(#index) => ::core::result::Result::Ok(
                #root::HostValue::to_value(&self.#ident)
            ),
        });
        set_arms.push(quote! {
            #root::AccessPath::Field(#index) => {
                self.#ident = <#ty as #root::HostValue>::from_value(value)?;
                ::core::result::Result::Ok(())
            }
        });
        template_items.push(quote! {
            (
                ::core::option::Option::Some(::std::string::String::from(#member)),
                #root::HostValue::to_value(&self.#ident),
            )
        });
        mapping_stmts.push(quote! {
            let mapping = mapping.field::<#ty>(#member, #field_str, &#hint)?;
        });
        to_value_stmts.push(quote! {
            fields.insert(
                ::std::string::String::from(#member),
                #root::HostValue::to_value(&self.#ident),
            );
        });
        from_value_stmts.push(quote! {
            if let ::core::option::Option::Some(v) = fields.remove(#member) {
                out.#ident = <#ty as #root::HostValue>::from_value(v)?;
            }
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let name_str = name.to_string();

    Ok(quote! {
        impl #impl_generics #root::HostRecord for #name #ty_generics #where_clause {
            fn shape() -> #root::RecordShape {
                #root::RecordShape::Struct
            }

            fn field_index(name: &str) -> ::core::option::Option<usize> {
                match name {
                    #(#index_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn fresh(_members: usize) -> Self {
                Self {
                    #(#fresh_fields),*
                }
            }

            fn get(&self, path: &#root::AccessPath) -> #root::Result<#root::Value> {
                match path {
                    #(#get_arms)*
                    other => ::core::result::Result::Err(#root::TypeMapError::Access {
                        member: ::std::string::ToString::to_string(other),
                        reason: ::std::format!("{} has no such field", #name_str),
                    }),
                }
            }

            fn set(&mut self, path: &#root::AccessPath, value: #root::Value) -> #root::Result<()> {
                match path {
                    #(#set_arms)*
                    other => ::core::result::Result::Err(#root::TypeMapError::Access {
                        member: ::std::string::ToString::to_string(other),
                        reason: ::std::format!("{} has no such field", #name_str),
                    }),
                }
            }

            fn template(&self) -> ::std::vec::Vec<(::core::option::Option<::std::string::String>, #root::Value)> {
                ::std::vec![#(#template_items),*]
            }
        }

        impl #impl_generics #root::H5Compound for #name #ty_generics #where_clause {
            fn mapping() -> #root::Result<#root::CompoundMapping> {
                let mapping = #root::CompoundMapping::new();
                #(#mapping_stmts)*
                ::core::result::Result::Ok(mapping)
            }
        }

        impl #impl_generics #root::HostValue for #name #ty_generics #where_clause {
            fn member_type(_hint: &#root::MemberHint) -> ::core::option::Option<#root::MemberType> {
                <Self as #root::H5Compound>::mapping()
                    .ok()
                    .map(|m| #root::MemberType::Compound(::std::boxed::Box::new(m)))
            }

            fn to_value(&self) -> #root::Value {
                let mut fields = ::std::collections::BTreeMap::new();
                #(#to_value_stmts)*
                #root::Value::Compound(fields)
            }

            fn from_value(value: #root::Value) -> #root::Result<Self> {
                match value {
                    #root::Value::Compound(mut fields) => {
                        let mut out = <Self as #root::HostRecord>::fresh(0);
                        #(#from_value_stmts)*
                        ::core::result::Result::Ok(out)
                    }
                    other => ::core::result::Result::Err(#root::TypeMapError::TypeMismatch {
                        context: ::std::string::String::from(#name_str),
                        expected: ::std::string::String::from("compound"),
                        found: ::std::string::String::from(other.kind()),
                    }),
                }
            }
        }
    })
}

/// Derive `HostValue` and `H5EnumValue` for a fieldless enum.
///
/// `#[h5(name = "...")]` on the enum names the enumeration type; on a
/// variant it renames the stored value.
#[proc_macro_derive(H5Enum, attributes(h5))]
pub fn derive_h5enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match impl_h5enum(&input) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn impl_h5enum(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            name,
            "H5Enum can only be derived for enums",
        ));
    };
    let root = root();
    let type_name = parse_attrs(&input.attrs)?
        .name
        .unwrap_or_else(|| name.to_string());

    let mut value_names = Vec::new();
    let mut to_ordinal = Vec::new();
    let mut from_ordinal = Vec::new();
    for (i, variant) in data.variants.iter().enumerate() {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "H5Enum variants cannot carry data",
            ));
        }
        let ident = &variant.ident;
        let stored = parse_attrs(&variant.attrs)?
            .name
            .unwrap_or_else(|| ident.to_string());
        value_names.push(stored);
        to_ordinal.push(quote! { #name::#ident => #i, });
        from_ordinal.push(quote! { #i => ::core::option::Option::Some(#name::#ident), });
    }

    Ok(quote! {
        impl #root::H5EnumValue for #name {
            fn enum_type() -> #root::EnumType {
                #root::EnumType::new(#type_name, &[#(#value_names),*])
            }

            fn ordinal(self) -> usize {
                match self {
                    #(#to_ordinal)*
                }
            }

            fn from_ordinal(ordinal: usize) -> ::core::option::Option<Self> {
                match ordinal {
                    #(#from_ordinal)*
                    _ => ::core::option::Option::None,
                }
            }
        }

        impl #root::HostValue for #name {
            fn member_type(_hint: &#root::MemberHint) -> ::core::option::Option<#root::MemberType> {
                ::core::option::Option::Some(#root::MemberType::enumeration(
                    <Self as #root::H5EnumValue>::enum_type(),
                ))
            }

            fn to_value(&self) -> #root::Value {
                let ty = <Self as #root::H5EnumValue>::enum_type();
                let ordinal = <Self as #root::H5EnumValue>::ordinal(*self);
                #root::Value::Enum(::std::string::String::from(
                    ty.name_of(ordinal).unwrap_or_default(),
                ))
            }

            fn from_value(value: #root::Value) -> #root::Result<Self> {
                let ty = <Self as #root::H5EnumValue>::enum_type();
                let ordinal = match &value {
                    #root::Value::Enum(s) | #root::Value::Str(s) => ty.ordinal(s),
                    other => other.as_integer().and_then(|v| usize::try_from(v).ok()),
                };
                ordinal
                    .and_then(<Self as #root::H5EnumValue>::from_ordinal)
                    .ok_or_else(|| #root::TypeMapError::ValueOutOfRange {
                        target: ::std::string::String::from(#type_name),
                        value: ::std::string::ToString::to_string(&value),
                    })
            }
        }
    })
}
