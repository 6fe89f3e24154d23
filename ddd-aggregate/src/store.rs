//! 聚合存储（AggregateStore）
//!
//! 以事件存储为后端持久化与重建聚合：
//! - `create` / `update` 写入未提交变更，`update` 以“当前版本 − 变更数”作为期望版本，
//!   并发写入时返回 `MismatchExpectedVersion`；
//! - `hydrate*` 在已有实例上回放（有界或无界）历史；
//! - `get_aggregate_*` 总是构造新实例再回放；
//! - `subscribe_to` 订阅某一聚合类型的类别流。
//!
use crate::aggregate::{Aggregate, AggregateEvent, Entity};
use crate::error::{AggregateError, AggregateResult};
use crate::resolver::{AggregateByTypeResolver, AggregateStreamResolver};
use bon::bon;
use ddd_eventstore::client::SubscriptionPosition;
use ddd_eventstore::event::{DateTime, Utc};
use ddd_eventstore::{AnyEvent, EventStore, ReadEnvelope, WriteEnvelope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AggregateStore {
    event_store: Arc<EventStore>,
    resolver: Arc<dyn AggregateStreamResolver>,
}

#[bon]
impl AggregateStore {
    #[builder]
    pub fn new(
        event_store: Arc<EventStore>,
        #[builder(default = Arc::new(AggregateByTypeResolver::new()))] resolver: Arc<
            dyn AggregateStreamResolver,
        >,
    ) -> Self {
        Self {
            event_store,
            resolver,
        }
    }
}

impl AggregateStore {
    pub fn resolver(&self) -> &dyn AggregateStreamResolver {
        self.resolver.as_ref()
    }

    /// 写入新聚合；流已存在时返回 `StreamAlreadyExists`
    pub async fn create<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.stream_of(aggregate);
        let changes = pending(aggregate);
        self.event_store
            .write()
            .save(&stream, changes, cancel)
            .await?;
        aggregate.core_mut().mark_committed();
        Ok(())
    }

    pub async fn update<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.stream_of(aggregate);
        let expected = aggregate.version() - aggregate.uncommitted_changes().len() as i64;
        let changes = pending(aggregate);
        self.event_store
            .write()
            .append_with_version(&stream, changes, expected, cancel)
            .await?;
        aggregate.core_mut().mark_committed();
        Ok(())
    }

    /// 回放完整历史；只接受从未应用过事件的实例
    pub async fn hydrate<A: Aggregate>(
        &self,
        aggregate: &mut A,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        if aggregate.version() != -1 {
            return Err(AggregateError::AlreadyHydrated {
                id: aggregate.id().to_string(),
            });
        }
        let stream = self.stream_of(aggregate);
        tracing::trace!(stream = %stream, "loading aggregate");
        let history = self.event_store.read().read_stream(&stream, cancel).await?;
        replay(aggregate, &stream, &history)
    }

    /// 从 `position` 起回放；此前的历史视为已反映在实例中
    pub async fn hydrate_from_position<A: Aggregate>(
        &self,
        aggregate: &mut A,
        position: u64,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.stream_of(aggregate);
        tracing::trace!(stream = %stream, position, "loading aggregate from position");
        let history = self
            .event_store
            .read()
            .read_stream_from_position(&stream, position, cancel)
            .await?;
        aggregate.core_mut().set_version(version_before(position));
        replay(aggregate, &stream, &history)
    }

    /// 回放至 `position`（含）
    pub async fn hydrate_until_position<A: Aggregate>(
        &self,
        aggregate: &mut A,
        position: u64,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.stream_of(aggregate);
        tracing::trace!(stream = %stream, position, "loading aggregate until position");
        let history = self
            .event_store
            .read()
            .read_stream_until_position(&stream, position, cancel)
            .await?;
        replay(aggregate, &stream, &history)
    }

    pub async fn hydrate_from_timestamp<A: Aggregate>(
        &self,
        aggregate: &mut A,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.stream_of(aggregate);
        tracing::trace!(stream = %stream, %timestamp, "loading aggregate from timestamp");
        let history = self
            .event_store
            .read()
            .read_stream_from_timestamp(&stream, timestamp, cancel)
            .await?;
        replay(aggregate, &stream, &history)
    }

    pub async fn hydrate_until_timestamp<A: Aggregate>(
        &self,
        aggregate: &mut A,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.stream_of(aggregate);
        tracing::trace!(stream = %stream, %timestamp, "loading aggregate until timestamp");
        let history = self
            .event_store
            .read()
            .read_stream_until_timestamp(&stream, timestamp, cancel)
            .await?;
        replay(aggregate, &stream, &history)
    }

    pub async fn get_aggregate_by_id<A: Aggregate>(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> AggregateResult<A> {
        let stream = self.resolver.stream_for(A::TYPE_NAME, id);
        self.get_aggregate_from_stream(&stream, cancel).await
    }

    pub async fn get_aggregate_from_stream<A: Aggregate>(
        &self,
        stream: &str,
        cancel: &CancellationToken,
    ) -> AggregateResult<A> {
        tracing::trace!(stream, "loading aggregate");
        let history = self.event_store.read().read_stream(stream, cancel).await?;
        self.rebuild(stream, &history)
    }

    pub async fn get_aggregate_from_stream_until_position<A: Aggregate>(
        &self,
        stream: &str,
        position: u64,
        cancel: &CancellationToken,
    ) -> AggregateResult<A> {
        tracing::trace!(stream, position, "loading aggregate until position");
        let history = self
            .event_store
            .read()
            .read_stream_until_position(stream, position, cancel)
            .await?;
        self.rebuild(stream, &history)
    }

    /// 从 `position` 起构建；版本起点与 `hydrate_from_position` 一致
    pub async fn get_aggregate_from_stream_from_position<A: Aggregate>(
        &self,
        stream: &str,
        position: u64,
        cancel: &CancellationToken,
    ) -> AggregateResult<A> {
        tracing::trace!(stream, position, "loading aggregate from position");
        let history = self
            .event_store
            .read()
            .read_stream_from_position(stream, position, cancel)
            .await?;
        let mut aggregate = A::new(self.resolver.aggregate_id_for_stream(stream));
        aggregate.core_mut().set_version(version_before(position));
        replay(&mut aggregate, stream, &history)?;
        Ok(aggregate)
    }

    /// 回放时间戳严格早于 `last_event` 的前缀
    pub async fn get_aggregate_from_stream_until_event<A: Aggregate>(
        &self,
        stream: &str,
        last_event: &dyn AnyEvent,
        cancel: &CancellationToken,
    ) -> AggregateResult<A> {
        tracing::trace!(stream, event_id = %last_event.event_id(), "loading aggregate until event");
        let mut history = self.event_store.read().read_stream(stream, cancel).await?;
        let cutoff = last_event.event_timestamp();
        let keep = history
            .iter()
            .take_while(|envelope| envelope.event().event_timestamp() < cutoff)
            .count();
        history.truncate(keep);
        self.rebuild(stream, &history)
    }

    /// 从头订阅聚合类型的类别流
    pub async fn subscribe_to<A: Aggregate>(
        &self,
        cancel: &CancellationToken,
    ) -> AggregateResult<()> {
        let stream = self.resolver.category_stream(A::TYPE_NAME);
        self.event_store
            .subscriber()
            .subscribe_to_stream(&stream, SubscriptionPosition::Start, cancel)
            .await?;
        Ok(())
    }

    fn stream_of<A: Aggregate>(&self, aggregate: &A) -> String {
        self.resolver.stream_for(A::TYPE_NAME, aggregate.id())
    }

    fn rebuild<A: Aggregate>(&self, stream: &str, history: &[ReadEnvelope]) -> AggregateResult<A> {
        let mut aggregate = A::new(self.resolver.aggregate_id_for_stream(stream));
        replay(&mut aggregate, stream, history)?;
        Ok(aggregate)
    }
}

impl std::fmt::Debug for AggregateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore")
            .field("event_store", &self.event_store)
            .finish_non_exhaustive()
    }
}

fn pending<A: Aggregate>(aggregate: &A) -> Vec<WriteEnvelope> {
    aggregate
        .uncommitted_changes()
        .iter()
        .cloned()
        .map(AggregateEvent::into_envelope)
        .collect()
}

/// `position` 之前最后一个事件的版本；超出 i64 范围时饱和
fn version_before(position: u64) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX) - 1
}

fn replay<A: Aggregate>(
    aggregate: &mut A,
    stream: &str,
    history: &[ReadEnvelope],
) -> AggregateResult<()> {
    aggregate.load_from_history(history)?;
    tracing::trace!(stream, version = aggregate.version(), "aggregate loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::version_before;

    #[test]
    fn version_before_position_saturates() {
        assert_eq!(version_before(0), -1);
        assert_eq!(version_before(3), 2);
        assert_eq!(version_before(u64::MAX), i64::MAX - 1);
    }
}
