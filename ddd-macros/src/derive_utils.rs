use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::{Attribute, Path, Token};

/// 从属性列表中摘出全部 `#[derive(..)]` 的路径
fn take_derives(attrs: &mut Vec<Attribute>) -> Vec<Path> {
    let mut derives = Vec::new();
    attrs.retain(|attr| {
        if !attr.path().is_ident("derive") {
            return true;
        }
        if let Ok(paths) = attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated) {
            derives.extend(paths);
        }
        false
    });
    derives
}

// Serialize 与 serde::Serialize 视为同一派生
fn derive_key(path: &Path) -> String {
    path.segments
        .last()
        .map(|segment| segment.ident.to_string())
        .unwrap_or_else(|| path.to_token_stream().to_string())
}

/// 合并宏要求的派生与用户已有派生，生成单个 derive 属性并置于最前
///
/// 要求的派生在前；`#[serde(..)]` 之类的辅助属性因此总在其派生之后。
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<Path>) {
    let user = take_derives(attrs);
    let mut derives: Vec<Path> = Vec::with_capacity(required.len() + user.len());
    for path in required.into_iter().chain(user) {
        let key = derive_key(&path);
        if !derives.iter().any(|known| derive_key(known) == key) {
            derives.push(path);
        }
    }
    attrs.insert(0, syn::parse_quote!(#[derive(#(#derives),*)]));
}
