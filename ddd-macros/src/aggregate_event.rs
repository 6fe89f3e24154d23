use crate::derive_utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, Type, parse_macro_input};

/// #[aggregate_event] 宏实现
/// - 仅支持单字段元组变体：`Variant(SomeEvent)`，其中 `SomeEvent: Event`
/// - 合并派生：Debug, Clone
/// - 生成 `::ddd_aggregate::AggregateEvent` 实现（注册、编码为信封、由类型擦除事件还原）
/// - 为每个变体的负载类型生成 `From` 实现
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::TokenStream::from(attr).span(),
            "#[aggregate_event] takes no arguments",
        )
        .to_compile_error()
        .into();
    }

    let mut input = parse_macro_input!(item as Item);
    let enum_item = match &mut input {
        Item::Enum(e) => e,
        other => {
            return syn::Error::new(other.span(), "#[aggregate_event] can only be used on enums")
                .to_compile_error()
                .into();
        }
    };

    if enum_item.variants.is_empty() {
        return syn::Error::new(enum_item.span(), "#[aggregate_event] requires at least one variant")
            .to_compile_error()
            .into();
    }

    let mut variants: Vec<(syn::Ident, Type)> = Vec::new();
    for v in &enum_item.variants {
        match &v.fields {
            syn::Fields::Unnamed(f) if f.unnamed.len() == 1 => {
                let ty = f.unnamed[0].ty.clone();
                variants.push((v.ident.clone(), ty));
            }
            _ => {
                return syn::Error::new(
                    v.span(),
                    "#[aggregate_event] supports only single-field tuple variants, e.g., Variant(SomeEvent)",
                )
                .to_compile_error()
                .into();
            }
        }
    }

    apply_derives(
        &mut enum_item.attrs,
        vec![syn::parse_quote!(Debug), syn::parse_quote!(Clone)],
    );

    let enum_ident = enum_item.ident.clone();
    let tys: Vec<&Type> = variants.iter().map(|(_, ty)| ty).collect();
    let idents: Vec<&syn::Ident> = variants.iter().map(|(ident, _)| ident).collect();

    let from_impls = variants.iter().map(|(v_ident, ty)| {
        quote! {
            impl ::std::convert::From<#ty> for #enum_ident {
                fn from(event: #ty) -> Self {
                    Self::#v_ident(event)
                }
            }
        }
    });

    let out = quote! {
        #input

        impl ::ddd_aggregate::AggregateEvent for #enum_ident {
            fn register(
                builder: ::ddd_eventstore::pipeline::EventRegistryBuilder,
            ) -> ::ddd_eventstore::pipeline::EventRegistryBuilder {
                builder #( .event::<#tys>() )*
            }

            fn as_event(&self) -> &dyn ::ddd_eventstore::AnyEvent {
                match self {
                    #( Self::#idents(event) => event, )*
                }
            }

            fn into_envelope(self) -> ::ddd_eventstore::WriteEnvelope {
                match self {
                    #( Self::#idents(event) => ::ddd_eventstore::WriteEnvelope::new(event), )*
                }
            }

            fn from_event(event: &dyn ::ddd_eventstore::AnyEvent) -> ::std::option::Option<Self> {
                #(
                    if let ::std::option::Option::Some(event) = event.downcast_ref::<#tys>() {
                        return ::std::option::Option::Some(Self::#idents(event.clone()));
                    }
                )*
                ::std::option::Option::None
            }
        }

        #( #from_impls )*
    };

    TokenStream::from(out)
}
