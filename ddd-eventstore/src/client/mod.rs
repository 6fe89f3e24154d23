//! 日志存储边界协议（client）
//!
//! 外部日志存储（网络客户端与传输协议）不在本 crate 内实现，这里仅定义核心所需的接口：
//! - `LogStoreClient`：追加与正向读取；
//! - `PersistentSubscriptionsClient`：创建并订阅持久订阅组；
//! - `PersistentSubscription`：对单条记录 ack / nack；
//! - `ConnectionFactory`：按连接串构建上述客户端。
//!
//! `InMemoryLogStore` 提供了完整的内存实现，用于测试与本地开发。
//!
#[cfg(feature = "in-memory")]
mod in_memory;

#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryLogStore, NackRecord};

use crate::error::StoreError;
use crate::settings::{EventStoreSettings, SubscriptionSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// `$all` 流名
pub const ALL_STREAM: &str = "$all";

/// 类别流前缀
pub const CATEGORY_STREAM_PREFIX: &str = "$ce-";

/// 追加时的期望状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedState {
    Any,
    NoStream,
    StreamExists,
    Revision(u64),
}

impl fmt::Display for ExpectedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedState::Any => f.write_str("any"),
            ExpectedState::NoStream => f.write_str("no stream"),
            ExpectedState::StreamExists => f.write_str("stream exists"),
            ExpectedState::Revision(revision) => write!(f, "{revision}"),
        }
    }
}

/// 待写入的编码事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub event_id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// 日志存储中的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub stream_id: String,
    pub event_id: Uuid,
    pub revision: u64,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub created: DateTime<Utc>,
}

/// 可能经过链接解析的记录
///
/// `link` 存在时，`event` 为链接所指向的原始事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
    pub event: RecordedEvent,
    pub link: Option<RecordedEvent>,
}

impl ResolvedRecord {
    pub fn new(event: RecordedEvent) -> Self {
        Self { event, link: None }
    }

    pub fn is_resolved(&self) -> bool {
        self.link.is_some()
    }

    /// 订阅中实际被投递的记录（链接本身或事件本身）
    pub fn original(&self) -> &RecordedEvent {
        self.link.as_ref().unwrap_or(&self.event)
    }
}

/// 订阅起始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionPosition {
    #[default]
    Start,
    End,
}

/// 负确认动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackAction {
    Park,
    Retry,
    Skip,
    Stop,
}

/// 订阅被断开的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// 订阅被主动释放
    Disposed,
    SubscriberError(String),
    ServerError(String),
}

/// 订阅流中的消息
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    Event {
        record: ResolvedRecord,
        retry_count: Option<u32>,
    },
    Dropped(DropReason),
}

/// 创建持久订阅组所需的设置
#[derive(Debug, Clone)]
pub struct PersistentSubscriptionSettings {
    pub resolve_link_tos: bool,
    pub start_from: SubscriptionPosition,
    pub subscription: SubscriptionSettings,
}

/// 一次成功的订阅：确认句柄与记录流
pub struct Subscription {
    pub handle: Arc<dyn PersistentSubscription>,
    pub messages: BoxStream<'static, SubscriptionMessage>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.handle.subscription_id())
            .finish_non_exhaustive()
    }
}

/// 可释放的客户端资源
#[async_trait]
pub trait Disposable: Send + Sync {
    async fn dispose(&self) -> Result<(), StoreError>;
}

/// 读写客户端
#[async_trait]
pub trait LogStoreClient: Disposable {
    /// 追加事件，返回流的下一个期望版本
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedState,
        events: Vec<EventData>,
        cancel: &CancellationToken,
    ) -> Result<i64, StoreError>;

    /// 自 `from` 起正向读取，最多 `max_count` 条
    async fn read_stream_forward(
        &self,
        stream: &str,
        from: u64,
        max_count: Option<u64>,
        resolve_links: bool,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<ResolvedRecord, StoreError>>, StoreError>;
}

/// 持久订阅管理客户端
#[async_trait]
pub trait PersistentSubscriptionsClient: Disposable {
    /// 创建持久订阅组；组已存在时返回 `StoreError::AlreadyExists`
    async fn create_to_stream(
        &self,
        stream: &str,
        group: &str,
        settings: &PersistentSubscriptionSettings,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;

    async fn subscribe_to_stream(
        &self,
        stream: &str,
        group: &str,
        buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Subscription, StoreError>;
}

/// 一个活动中的持久订阅
#[async_trait]
pub trait PersistentSubscription: Send + Sync {
    fn subscription_id(&self) -> &str;

    async fn ack(&self, record: &ResolvedRecord) -> Result<(), StoreError>;

    async fn nack(
        &self,
        action: NackAction,
        reason: &str,
        record: &ResolvedRecord,
    ) -> Result<(), StoreError>;
}

/// 客户端工厂：连接层在需要时调用，以惰性构建句柄
pub trait ConnectionFactory: Send + Sync {
    fn create_client(
        &self,
        settings: &EventStoreSettings,
    ) -> Result<Arc<dyn LogStoreClient>, StoreError>;

    fn create_persistent_subscriptions_client(
        &self,
        settings: &EventStoreSettings,
    ) -> Result<Arc<dyn PersistentSubscriptionsClient>, StoreError>;
}
