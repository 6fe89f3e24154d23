//! 事件溯源工具库的过程宏（ddd-macros）
//!
//! - `#[event]`：为具名字段结构体注入 `id`/`timestamp` 并实现 `ddd_eventstore::Event`；
//! - `#[aggregate_event]`：把若干事件组合为聚合的事件和类型，实现 `ddd_aggregate::AggregateEvent`；
//! - `#[aggregate]`：为聚合结构体注入 `AggregateCore` 并实现 `ddd_aggregate::Entity`。
//!
//! 生成的代码通过 `::ddd_eventstore` / `::ddd_aggregate` 绝对路径引用运行时类型，
//! 使用方需直接依赖对应 crate 以及 `serde`。
//!
mod aggregate;
mod aggregate_event;
mod derive_utils;
mod event;
mod field_utils;

use proc_macro::TokenStream;

/// 事件宏
///
/// ```ignore
/// #[event]
/// pub struct UserCreated {
///     pub name: String,
/// }
/// ```
///
/// 展开后结构体包含 `id: Uuid` 与 `timestamp: DateTime<Utc>`，
/// 派生 `Debug, Clone, PartialEq, Serialize, Deserialize`。
/// 可选参数 `#[event(name = "...")]` 覆写事件的简单类型名。
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}

/// 聚合事件宏
///
/// ```ignore
/// #[aggregate_event]
/// pub enum UserEvent {
///     Created(UserCreated),
///     Updated(UserUpdated),
/// }
/// ```
#[proc_macro_attribute]
pub fn aggregate_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    aggregate_event::expand(attr, item)
}

/// 聚合宏
///
/// ```ignore
/// #[aggregate(event = UserEvent)]
/// pub struct User {
///     name: String,
/// }
/// ```
#[proc_macro_attribute]
pub fn aggregate(attr: TokenStream, item: TokenStream) -> TokenStream {
    aggregate::expand(attr, item)
}
