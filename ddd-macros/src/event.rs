use crate::derive_utils::apply_derives;
use crate::field_utils::ensure_leading_fields;
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, LitStr, Result, Token, Type, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[event] 宏实现
/// - 仅支持具名字段结构体
/// - 确保字段 `id: Uuid`、`timestamp: DateTime<Utc>` 位于最前（已存在则复用原定义）
/// - 合并派生：Debug, Clone, PartialEq, Serialize, Deserialize
/// - 生成 `::ddd_eventstore::Event` 实现；`#[event(name = "...")]` 可覆写简单类型名
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[event] can only be used on structs")
                .to_compile_error()
                .into();
        }
    };

    if !st.generics.params.is_empty() {
        return syn::Error::new(st.generics.span(), "#[event] does not support generic structs")
            .to_compile_error()
            .into();
    }

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(
                st.span(),
                "#[event] supports only named-field structs, e.g., struct X { a: T }",
            )
            .to_compile_error()
            .into();
        }
    };

    let id_ty: Type = syn::parse_quote! { ::ddd_eventstore::event::Uuid };
    let timestamp_ty: Type = syn::parse_quote! {
        ::ddd_eventstore::event::DateTime<::ddd_eventstore::event::Utc>
    };
    ensure_leading_fields(fields_named, &[("id", &id_ty), ("timestamp", &timestamp_ty)]);

    apply_derives(
        &mut st.attrs,
        vec![
            syn::parse_quote!(Debug),
            syn::parse_quote!(Clone),
            syn::parse_quote!(PartialEq),
            syn::parse_quote!(serde::Serialize),
            syn::parse_quote!(serde::Deserialize),
        ],
    );

    let ident = &st.ident;
    let name = cfg
        .name
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));

    let out = quote! {
        #st

        impl ::ddd_eventstore::Event for #ident {
            const NAME: &'static str = #name;

            fn id(&self) -> ::ddd_eventstore::event::Uuid {
                self.id
            }

            fn timestamp(&self) -> ::ddd_eventstore::event::DateTime<::ddd_eventstore::event::Utc> {
                self.timestamp
            }
        }
    };

    TokenStream::from(out)
}

// -------- parsing --------

// 键值参数：name = "..."
struct EventAttrConfig {
    name: Option<LitStr>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut name: Option<LitStr> = None;

        while !input.is_empty() {
            let key: syn::Ident = input.parse()?;
            let _eq: Token![=] = input.parse()?;
            match key.to_string().as_str() {
                "name" => {
                    if name.is_some() {
                        return Err(syn::Error::new(
                            key.span(),
                            "duplicate key 'name' in attribute",
                        ));
                    }
                    name = Some(input.parse()?);
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "unknown key in attribute; expected 'name'",
                    ));
                }
            }

            if input.is_empty() {
                break;
            }
            let _comma: Token![,] = input.parse()?;
        }

        Ok(Self { name })
    }
}
