//! 事件类型注册表（EventTypes）
//!
//! 解码时需要由类型身份头还原具体类型。注册表在应用启动时显式构建，
//! 按完全限定令牌索引，同时保留“声明模块 + 简单名”的回退索引。
//!
use super::{AnyEvent, Event, EventTypeInfo};
use std::collections::HashMap;
use std::sync::Arc;

type DecodeFn = fn(&[u8]) -> serde_json::Result<Arc<dyn AnyEvent>>;

/// 单个事件类型的描述：身份与解码函数
#[derive(Clone, Copy)]
pub struct EventDescriptor {
    info: EventTypeInfo,
    decode: DecodeFn,
}

impl EventDescriptor {
    pub fn of<E: Event>() -> Self {
        Self {
            info: EventTypeInfo::of::<E>(),
            decode: decode_as::<E>,
        }
    }

    pub fn info(&self) -> EventTypeInfo {
        self.info
    }

    pub fn decode(&self, payload: &[u8]) -> serde_json::Result<Arc<dyn AnyEvent>> {
        (self.decode)(payload)
    }
}

impl std::fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("info", &self.info)
            .finish()
    }
}

fn decode_as<E: Event>(payload: &[u8]) -> serde_json::Result<Arc<dyn AnyEvent>> {
    let event: E = serde_json::from_slice(payload)?;
    Ok(Arc::new(event))
}

/// 已知事件类型集合
#[derive(Debug, Clone, Default)]
pub struct EventTypes {
    by_token: HashMap<&'static str, EventDescriptor>,
    by_name: HashMap<String, EventDescriptor>,
}

impl EventTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册事件类型；重复注册同一类型是幂等的
    pub fn register<E: Event>(&mut self) -> &mut Self {
        let descriptor = EventDescriptor::of::<E>();
        let info = descriptor.info();
        self.by_token.insert(info.type_token(), descriptor);
        self.by_name
            .insert(fallback_key(info.module(), info.name()), descriptor);
        self
    }

    /// 先按令牌查找，未命中时回退至“模块 + 简单名”
    pub fn resolve(&self, type_token: &str, module: &str, name: &str) -> Option<EventDescriptor> {
        self.by_token
            .get(type_token)
            .or_else(|| self.by_name.get(&fallback_key(module, name)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

fn fallback_key(module: &str, name: &str) -> String {
    format!("{module}/{name}")
}
