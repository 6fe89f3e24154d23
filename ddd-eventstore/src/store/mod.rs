//! 读写门面（store）
//!
//! - `WriteEventStore`：带并发期望的追加，以及追加前后钩子；
//! - `ReadEventStore`：按位置或时间戳界定的正向读取；
//! - `EventStore`：组合读写门面与持久订阅器的入口。
//!
mod event_store;
mod read;
mod write;

pub use event_store::EventStore;
pub use read::ReadEventStore;
pub use write::WriteEventStore;
