//! 事件特征（Event / AnyEvent）
//!
//! `Event` 是应用侧实现的强类型事件协议；`AnyEvent` 为其类型擦除形式，
//! 便于在同一条流中承载异构事件，并在管道中按运行时类型分发。
//!
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 强类型事件：不可变值，具备唯一标识与发生时间
///
/// 通常由 `#[event]` 宏生成实现，也可手动实现。
pub trait Event:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    /// 事件的简单类型名
    const NAME: &'static str;

    /// 事件唯一标识
    fn id(&self) -> Uuid;

    /// 事件发生时间
    fn timestamp(&self) -> DateTime<Utc>;
}

/// 事件的类型身份：简单名、完全限定令牌、声明模块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTypeInfo {
    name: &'static str,
    type_token: &'static str,
    module: &'static str,
}

impl EventTypeInfo {
    pub fn of<E: Event>() -> Self {
        let type_token = std::any::type_name::<E>();
        let module = type_token.split("::").next().unwrap_or(type_token);

        Self {
            name: E::NAME,
            type_token,
            module,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 完全限定的类型令牌（包含声明 crate 与模块路径）
    pub fn type_token(&self) -> &'static str {
        self.type_token
    }

    /// 声明该类型的 crate
    pub fn module(&self) -> &'static str {
        self.module
    }
}

/// 类型擦除的事件
pub trait AnyEvent: fmt::Debug + Send + Sync + 'static {
    fn event_id(&self) -> Uuid;

    fn event_timestamp(&self) -> DateTime<Utc>;

    fn event_type(&self) -> EventTypeInfo;

    /// 具体事件类型的 `TypeId`
    fn event_type_id(&self) -> TypeId;

    fn as_any(&self) -> &dyn Any;

    /// 编码为 JSON 负载
    fn to_payload(&self) -> serde_json::Result<Vec<u8>>;

    fn clone_arc(&self) -> Arc<dyn AnyEvent>;
}

impl<E: Event> AnyEvent for E {
    fn event_id(&self) -> Uuid {
        self.id()
    }

    fn event_timestamp(&self) -> DateTime<Utc> {
        self.timestamp()
    }

    fn event_type(&self) -> EventTypeInfo {
        EventTypeInfo::of::<E>()
    }

    fn event_type_id(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn clone_arc(&self) -> Arc<dyn AnyEvent> {
        Arc::new(self.clone())
    }
}

impl dyn AnyEvent {
    /// 向下转型为具体事件类型
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.event_type_id() == TypeId::of::<E>()
    }
}
