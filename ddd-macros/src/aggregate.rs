use crate::derive_utils::apply_derives;
use crate::field_utils::{ensure_leading_fields, has_field_named};
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{
    Item, LitStr, Result, Token, Type, parse::Parse, parse::ParseStream,
    parse_macro_input,
};

/// #[aggregate] 宏实现
/// - 必填参数：`#[aggregate(event = XxxEvent)]`，事件需由 `#[aggregate_event]` 生成
/// - 若缺失则追加字段 `core: AggregateCore<XxxEvent>`，并置于字段最前
/// - 合并派生：Debug, Default（其余字段需实现 Default）
/// - 自动实现 `::ddd_aggregate::Entity`（new/core/core_mut），
///   `name = "..."` 可覆写用于推导流名的类型名
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as AggregateAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[aggregate] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let Some(event_ty) = cfg.event_ty else {
        return syn::Error::new(
            st.ident.span(),
            "#[aggregate] requires the event type, e.g., #[aggregate(event = UserEvent)]",
        )
        .to_compile_error()
        .into();
    };

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "only supports named-field struct")
                .to_compile_error()
                .into();
        }
    };

    if has_field_named(fields_named, "core") {
        return syn::Error::new(
            fields_named.span(),
            "field 'core' is reserved by #[aggregate]",
        )
        .to_compile_error()
        .into();
    }

    let core_ty: Type = syn::parse_quote! { ::ddd_aggregate::AggregateCore<#event_ty> };
    ensure_leading_fields(fields_named, &[("core", &core_ty)]);

    apply_derives(
        &mut st.attrs,
        vec![syn::parse_quote!(Debug), syn::parse_quote!(Default)],
    );

    let ident = &st.ident;
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();
    let name = cfg
        .name
        .unwrap_or_else(|| LitStr::new(&ident.to_string(), ident.span()));

    let expanded = quote! {
        #st

        impl #impl_generics ::ddd_aggregate::Entity for #ident #ty_generics #where_clause {
            type Event = #event_ty;

            const TYPE_NAME: &'static str = #name;

            fn new(id: ::std::string::String) -> Self {
                Self {
                    core: ::ddd_aggregate::AggregateCore::new(id),
                    ..::std::default::Default::default()
                }
            }

            fn core(&self) -> &::ddd_aggregate::AggregateCore<#event_ty> {
                &self.core
            }

            fn core_mut(&mut self) -> &mut ::ddd_aggregate::AggregateCore<#event_ty> {
                &mut self.core
            }
        }
    };

    TokenStream::from(expanded)
}

// -------- parsing --------

struct AggregateAttrConfig {
    event_ty: Option<Type>,
    name: Option<LitStr>,
}

impl Parse for AggregateAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut event_ty: Option<Type> = None;
        let mut name: Option<LitStr> = None;

        let elems = syn::punctuated::Punctuated::<AggregateAttrElem, Token![,]>::parse_terminated(
            input,
        )?;

        for elem in elems.into_iter() {
            match elem {
                AggregateAttrElem::Event(ty) => {
                    if event_ty.is_some() {
                        return Err(syn::Error::new(
                            ty.span(),
                            "duplicate key 'event' in attribute",
                        ));
                    }
                    event_ty = Some(*ty);
                }
                AggregateAttrElem::Name(lit) => {
                    if name.is_some() {
                        return Err(syn::Error::new(
                            lit.span(),
                            "duplicate key 'name' in attribute",
                        ));
                    }
                    name = Some(lit);
                }
            }
        }

        Ok(Self { event_ty, name })
    }
}

enum AggregateAttrElem {
    Event(Box<Type>),
    Name(LitStr),
}

impl Parse for AggregateAttrElem {
    fn parse(input: ParseStream) -> Result<Self> {
        let key: syn::Ident = input.parse()?;
        let _eq: Token![=] = input.parse()?;
        if key == "event" {
            Ok(AggregateAttrElem::Event(Box::new(input.parse()?)))
        } else if key == "name" {
            Ok(AggregateAttrElem::Name(input.parse()?))
        } else {
            Err(syn::Error::new(
                key.span(),
                "unknown key in attribute; expected 'event' or 'name'",
            ))
        }
    }
}
