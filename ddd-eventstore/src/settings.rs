//! 事件存储配置（值对象，不含加载机制）
//!
//! 所有配置均可通过 `builder()` 构建，或经 serde 从任意配置源反序列化；
//! 未给出的字段取 `Default` 中的值。
//!
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 事件存储设置
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreSettings {
    /// 日志存储连接串
    #[builder(into)]
    pub connection_string: String,
    /// 持久订阅设置；订阅时必需
    pub subscription: Option<SubscriptionSettings>,
    /// 订阅缓冲区大小
    #[builder(default = 10)]
    pub subscription_buffer_size: usize,
    /// 订阅断开后是否自动重连
    #[builder(default = true)]
    pub reconnect_on_subscription_dropped: bool,
    /// 是否解析链接事件
    #[builder(default)]
    pub resolve_events: bool,
    /// 缺少处理器时是否 park
    #[builder(default)]
    pub treat_missing_handlers_as_errors: bool,
    /// 非本库产生的记录是否 park
    #[builder(default)]
    pub treat_foreign_events_as_errors: bool,
}

impl Default for EventStoreSettings {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            subscription: None,
            subscription_buffer_size: 10,
            reconnect_on_subscription_dropped: true,
            resolve_events: false,
            treat_missing_handlers_as_errors: false,
            treat_foreign_events_as_errors: false,
        }
    }
}

/// 持久订阅组的消费者策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerStrategy {
    #[default]
    RoundRobin,
    DispatchToSingle,
    Pinned,
}

/// 持久订阅设置
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// 订阅组名
    #[builder(into)]
    pub group: String,
    #[builder(default)]
    pub resolve_link_tos: bool,
    #[builder(default)]
    pub extra_statistics: bool,
    pub message_timeout: Option<Duration>,
    #[builder(default = 10)]
    pub max_retry_count: u32,
    #[builder(default = 500)]
    pub live_buffer_size: u32,
    #[builder(default = 20)]
    pub read_batch_size: u32,
    #[builder(default = 500)]
    pub history_buffer_size: u32,
    pub checkpoint_after: Option<Duration>,
    #[builder(default = 10)]
    pub checkpoint_lower_bound: u32,
    #[builder(default = 1000)]
    pub checkpoint_upper_bound: u32,
    /// 0 表示不限制
    #[builder(default)]
    pub max_subscriber_count: u32,
    #[builder(default)]
    pub consumer_strategy: ConsumerStrategy,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            group: String::new(),
            resolve_link_tos: false,
            extra_statistics: false,
            message_timeout: None,
            max_retry_count: 10,
            live_buffer_size: 500,
            read_batch_size: 20,
            history_buffer_size: 500,
            checkpoint_after: None,
            checkpoint_lower_bound: 10,
            checkpoint_upper_bound: 1000,
            max_subscriber_count: 0,
            consumer_strategy: ConsumerStrategy::RoundRobin,
        }
    }
}
