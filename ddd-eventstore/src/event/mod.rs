//! 事件模型（event）
//!
//! - `Event` / `AnyEvent`：强类型事件及其类型擦除形式；
//! - `WriteEnvelope` / `ReadEnvelope`：事件与调用方元数据的配对；
//! - `EventTypes`：解码所需的显式类型注册表。
//!
//! 宏生成的代码通过本模块引用 `Uuid`、`DateTime`、`Utc`，
//! 应用无需直接依赖 `uuid` 与 `chrono`。
//!
mod envelope;
mod event_trait;
mod types;

pub use envelope::{Metadata, ReadEnvelope, WriteEnvelope};
pub use event_trait::{AnyEvent, Event, EventTypeInfo};
pub use types::{EventDescriptor, EventTypes};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
