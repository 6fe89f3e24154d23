//! 事件存储客户端工具库（ddd-eventstore）
//!
//! 构建在“按流追加、乐观并发、持久订阅”的外部日志存储之上，提供：
//! - 事件模型与信封（`event`），以及带类型身份头的序列化（`serializer`）
//! - 外部日志存储的边界协议与内存实现（`client`）
//! - 惰性、可替换的连接句柄与重连策略（`connection`）
//! - 带并发期望与追加钩子的读写门面（`store`）
//! - 处理链注册表与执行计划（`pipeline`）
//! - 持久订阅的消费、确认与自动重订阅（`subscription`）
//!
//! 网络客户端与传输协议不在本 crate 内实现：接入真实日志存储时，
//! 实现 `client` 中的边界协议并提供一个 `ConnectionFactory` 即可。
//!
//! 典型用法：
//! 1. 用 `#[event]` 定义事件，在 `EventRegistry` 中登记处理器与处理链组件；
//! 2. 通过 `EventStore::builder()` 装配配置、连接工厂与注册表；
//! 3. 写入侧调用 `write().save/append`，读取侧调用 `read().read_stream*`；
//! 4. 消费侧调用 `subscriber().subscribe_to_stream`，由管道驱动处理器。
//!
pub mod client;
pub mod connection;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod serializer;
pub mod settings;
pub mod store;
pub mod subscription;

pub use error::{EventStoreError, EventStoreResult, StoreError};
pub use event::{AnyEvent, Event, Metadata, ReadEnvelope, WriteEnvelope};
pub use pipeline::{ConsumerContext, EventRegistry, OperationResult};
pub use settings::{EventStoreSettings, SubscriptionSettings};
pub use store::EventStore;

// 允许在本 crate 内部通过 ::ddd_eventstore 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::ddd_eventstore 路径。
extern crate self as ddd_eventstore;
