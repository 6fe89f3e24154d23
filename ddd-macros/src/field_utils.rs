use proc_macro2::Span;
use syn::{Field, FieldsNamed, Ident, Type};

fn is_named(field: &Field, name: &str) -> bool {
    field.ident.as_ref().is_some_and(|ident| ident == name)
}

pub(crate) fn has_field_named(fields_named: &FieldsNamed, name: &str) -> bool {
    fields_named.named.iter().any(|field| is_named(field, name))
}

/// 将 `leading` 中的字段按给定顺序放到结构体最前
///
/// 用户已声明的同名字段连同其属性原样移动；缺失的按给定类型补齐。
/// 其余字段保持原有相对顺序。
pub(crate) fn ensure_leading_fields(fields_named: &mut FieldsNamed, leading: &[(&str, &Type)]) {
    let (mut declared, rest): (Vec<Field>, Vec<Field>) = std::mem::take(&mut fields_named.named)
        .into_iter()
        .partition(|field| leading.iter().any(|(name, _)| is_named(field, name)));

    for (name, ty) in leading {
        let field = match declared.iter().position(|field| is_named(field, name)) {
            Some(at) => declared.remove(at),
            None => {
                let ident = Ident::new(name, Span::call_site());
                syn::parse_quote! { #ident: #ty }
            }
        };
        fields_named.named.push(field);
    }
    fields_named.named.extend(rest);
}
