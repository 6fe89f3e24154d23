//! 事件信封（WriteEnvelope / ReadEnvelope）
//!
//! 信封将事件与调用方可见的元数据配对；序列化时注入的内部头
//! 永远不会出现在信封的元数据中。
//!
use super::{AnyEvent, Event};
use std::collections::HashMap;
use std::sync::Arc;

/// 调用方可见的元数据
pub type Metadata = HashMap<String, String>;

/// 待写入的事件信封
///
/// `metadata` 为 `None` 与 `Some(空表)` 语义不同：后者在解码后仍会还原为空表。
#[derive(Debug, Clone)]
pub struct WriteEnvelope {
    event: Arc<dyn AnyEvent>,
    metadata: Option<Metadata>,
}

impl WriteEnvelope {
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            event: Arc::new(event),
            metadata: None,
        }
    }

    pub fn with_metadata<E: Event>(event: E, metadata: Metadata) -> Self {
        Self {
            event: Arc::new(event),
            metadata: Some(metadata),
        }
    }

    pub fn from_arc(event: Arc<dyn AnyEvent>, metadata: Option<Metadata>) -> Self {
        Self { event, metadata }
    }

    pub fn event(&self) -> &dyn AnyEvent {
        self.event.as_ref()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// 追加前钩子可借此修改元数据
    pub fn metadata_mut(&mut self) -> &mut Option<Metadata> {
        &mut self.metadata
    }

    pub fn into_parts(self) -> (Arc<dyn AnyEvent>, Option<Metadata>) {
        (self.event, self.metadata)
    }
}

impl<E: Event> From<E> for WriteEnvelope {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

/// 从日志存储中读出并完成解码的事件信封
#[derive(Debug, Clone)]
pub struct ReadEnvelope {
    event: Arc<dyn AnyEvent>,
    metadata: Option<Metadata>,
    stream: String,
    revision: u64,
}

impl ReadEnvelope {
    pub fn new(
        event: Arc<dyn AnyEvent>,
        metadata: Option<Metadata>,
        stream: impl Into<String>,
        revision: u64,
    ) -> Self {
        Self {
            event,
            metadata,
            stream: stream.into(),
            revision,
        }
    }

    pub fn event(&self) -> &dyn AnyEvent {
        self.event.as_ref()
    }

    pub fn event_arc(&self) -> Arc<dyn AnyEvent> {
        self.event.clone()
    }

    /// 按具体类型取出事件
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.event.as_ref().downcast_ref::<E>()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// 事件所在的流
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// 事件在流中的位置（从 0 开始）
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
