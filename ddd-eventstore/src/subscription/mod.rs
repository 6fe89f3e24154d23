//! 持久订阅（subscription）
//!
//! `PersistentSubscriber` 负责创建持久订阅组、驱动消费循环，
//! 并依据处理结果与配置策略对记录进行 ack / nack / park。
//!
mod subscriber;

pub use subscriber::PersistentSubscriber;
