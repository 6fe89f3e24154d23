//! 事件存储统一错误定义
//!
//! - `EventStoreError`：面向调用方的错误，可按变体进行模式匹配；
//! - `StoreError`：外部日志存储客户端在边界处上报的原始错误，
//!   由读写门面与订阅器翻译为 `EventStoreError`。
//!
use crate::client::ExpectedState;
use thiserror::Error;
use uuid::Uuid;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventStoreError {
    // --- 并发冲突 ---
    #[error("Trying to create stream {stream} but already exists")]
    StreamAlreadyExists { stream: String },
    #[error("Stream {stream} expected to have version {expected} but found {actual}")]
    MismatchExpectedVersion {
        stream: String,
        expected: i64,
        actual: i64,
    },

    // --- 连接 ---
    #[error("connection to the log store failed")]
    ConnectionFailed,
    #[error("connections to the log store have been stopped")]
    ConnectionsStopped,

    // --- 读写 ---
    #[error("Stream {stream} was not found")]
    StreamNotFound { stream: String },
    #[error("Error appending event to stream {stream}")]
    ErrorAppendingEventsToStream {
        stream: String,
        #[source]
        source: StoreError,
    },
    #[error("Error reading from stream {stream}")]
    ErrorReadingFromStream {
        stream: String,
        #[source]
        source: StoreError,
    },

    // --- 序列化 ---
    #[error("unknown event type in stream {stream}: event_id={event_id}, type={type_token}")]
    UnknownEventType {
        stream: String,
        event_id: Uuid,
        type_token: String,
    },
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    // --- 订阅 ---
    #[error("Subscription to stream {stream} failed")]
    SubscriptionFailed { stream: String },
    #[error("cannot subscribe to {stream}, use subscribe_to_all instead")]
    InvalidSubscriptionStream { stream: String },

    // --- 配置与扩展点 ---
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    #[error("append hook failed: {source}")]
    Hook {
        #[source]
        source: anyhow::Error,
    },

    // --- 通用 ---
    #[error("operation cancelled")]
    Cancelled,
}

impl EventStoreError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// 是否为可自动重试的瞬时连接错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailed)
    }
}

/// 统一 Result 类型别名
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// 日志存储客户端错误（边界协议）
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("wrong expected version for stream {stream}: expected={expected}, actual={actual:?}")]
    WrongExpectedVersion {
        stream: String,
        expected: ExpectedState,
        actual: Option<u64>,
    },
    #[error("stream {stream} not found")]
    StreamNotFound { stream: String },
    #[error("resource already exists")]
    AlreadyExists,
    #[error("log store unavailable: {0}")]
    Unavailable(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}
