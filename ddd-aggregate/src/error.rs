//! 聚合层错误定义
//!
use ddd_eventstore::EventStoreError;
use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AggregateError {
    // --- 事件存储 ---
    #[error(transparent)]
    Store(#[from] EventStoreError),

    // --- 回放 ---
    #[error("Aggregate with Id {id} cannot be hydrated since it has events")]
    AlreadyHydrated { id: String },
    #[error("event {event_type} does not belong to aggregate {aggregate}")]
    UnexpectedEvent {
        aggregate: &'static str,
        event_type: &'static str,
    },
}

pub type AggregateResult<T> = Result<T, AggregateError>;
