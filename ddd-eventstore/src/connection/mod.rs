//! 连接韧性层（connection）
//!
//! - `ConnectionProvider`：读/写/订阅三个惰性句柄，断连后按代次替换，支持一次性停止；
//! - `ConnectionStrategy`：可插拔重连策略，`execute` 驱动每一次远程调用。
//!
mod provider;
mod strategy;

pub use provider::{ClientHandle, ConnectionProvider};
pub use strategy::{ConnectionStrategy, FixedRetryStrategy, NoRetryStrategy, execute};
