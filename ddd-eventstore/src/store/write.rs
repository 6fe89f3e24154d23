//! 写门面（WriteEventStore）
//!
//! 追加流程：逐条执行追加前动作 → 序列化 → 经重连策略追加 → 逐条执行追加后动作。
//! 追加前动作按事件的运行时类型选取，可修改信封元数据。
//!
use crate::client::{EventData, ExpectedState, LogStoreClient};
use crate::connection::{self, ClientHandle, ConnectionProvider, ConnectionStrategy};
use crate::error::{EventStoreError, EventStoreResult, StoreError};
use crate::event::{AnyEvent, WriteEnvelope};
use crate::pipeline::EventRegistry;
use crate::serializer::Serializer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 追加时的并发期望
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    /// 流必须不存在
    NoStream,
    /// 流必须已存在
    StreamExists,
    /// 流必须处于给定版本；负数表示流必须不存在
    Version(i64),
}

impl Expectation {
    fn state(self) -> ExpectedState {
        match self {
            Expectation::NoStream => ExpectedState::NoStream,
            Expectation::StreamExists => ExpectedState::StreamExists,
            Expectation::Version(version) => u64::try_from(version)
                .map(ExpectedState::Revision)
                .unwrap_or(ExpectedState::NoStream),
        }
    }
}

pub struct WriteEventStore {
    connections: Arc<ConnectionProvider>,
    strategy: Arc<dyn ConnectionStrategy>,
    serializer: Arc<Serializer>,
    registry: Arc<EventRegistry>,
}

impl WriteEventStore {
    pub(crate) fn new(
        connections: Arc<ConnectionProvider>,
        strategy: Arc<dyn ConnectionStrategy>,
        serializer: Arc<Serializer>,
        registry: Arc<EventRegistry>,
    ) -> Self {
        Self {
            connections,
            strategy,
            serializer,
            registry,
        }
    }

    /// 写入新流；流已存在时返回 `StreamAlreadyExists`
    ///
    /// 返回流的下一个期望版本（最后一条事件的位置）。
    pub async fn save(
        &self,
        stream: &str,
        events: Vec<WriteEnvelope>,
        cancel: &CancellationToken,
    ) -> EventStoreResult<i64> {
        self.append_events(stream, events, Expectation::NoStream, cancel)
            .await
    }

    /// 追加到已存在的流
    pub async fn append(
        &self,
        stream: &str,
        events: Vec<WriteEnvelope>,
        cancel: &CancellationToken,
    ) -> EventStoreResult<i64> {
        self.append_events(stream, events, Expectation::StreamExists, cancel)
            .await
    }

    /// 在给定版本上追加；版本不符时返回 `MismatchExpectedVersion`
    pub async fn append_with_version(
        &self,
        stream: &str,
        events: Vec<WriteEnvelope>,
        expected_version: i64,
        cancel: &CancellationToken,
    ) -> EventStoreResult<i64> {
        self.append_events(stream, events, Expectation::Version(expected_version), cancel)
            .await
    }

    async fn append_events(
        &self,
        stream: &str,
        envelopes: Vec<WriteEnvelope>,
        expected: Expectation,
        cancel: &CancellationToken,
    ) -> EventStoreResult<i64> {
        tracing::debug!(stream, count = envelopes.len(), "appending events");

        let mut events: Vec<Arc<dyn AnyEvent>> = Vec::with_capacity(envelopes.len());
        let mut data: Vec<EventData> = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let (event, mut metadata) = envelope.into_parts();
            for action in self.registry.pre_append_actions(event.as_ref()) {
                action
                    .execute(event.as_ref(), &mut metadata, cancel)
                    .await
                    .map_err(|source| EventStoreError::Hook { source })?;
            }
            let envelope = WriteEnvelope::from_arc(event, metadata);
            data.push(self.serializer.serialize(&envelope)?);
            events.push(envelope.into_parts().0);
        }

        let batch = data.as_slice();
        let next_version = connection::execute(self.strategy.as_ref(), cancel, move || {
            self.append_once(stream, expected, batch, cancel)
        })
        .await?;
        tracing::debug!(stream, next_version, count = events.len(), "events appended");

        for event in &events {
            for action in self.registry.post_append_actions(event.as_ref()) {
                action
                    .execute(event.as_ref(), cancel)
                    .await
                    .map_err(|source| EventStoreError::Hook { source })?;
            }
        }
        Ok(next_version)
    }

    async fn append_once(
        &self,
        stream: &str,
        expected: Expectation,
        batch: &[EventData],
        cancel: &CancellationToken,
    ) -> EventStoreResult<i64> {
        let client = self.connections.write_client()?;
        match client
            .append_to_stream(stream, expected.state(), batch.to_vec(), cancel)
            .await
        {
            Ok(next_version) => Ok(next_version),
            Err(err) => Err(self.translate(stream, expected, &client, err).await),
        }
    }

    async fn translate(
        &self,
        stream: &str,
        expected: Expectation,
        client: &ClientHandle<dyn LogStoreClient>,
        err: StoreError,
    ) -> EventStoreError {
        match (err, expected) {
            (StoreError::WrongExpectedVersion { .. }, Expectation::NoStream) => {
                EventStoreError::StreamAlreadyExists {
                    stream: stream.to_string(),
                }
            }
            (StoreError::WrongExpectedVersion { actual, .. }, Expectation::Version(version)) => {
                EventStoreError::MismatchExpectedVersion {
                    stream: stream.to_string(),
                    expected: version,
                    actual: actual.map(|revision| revision as i64).unwrap_or(-1),
                }
            }
            (StoreError::Unavailable(reason), _) => {
                tracing::warn!(stream, reason = %reason, "write client unavailable");
                self.connections.write_client_disconnected(client).await;
                EventStoreError::ConnectionFailed
            }
            (StoreError::Cancelled, _) => EventStoreError::Cancelled,
            (source, _) => EventStoreError::ErrorAppendingEventsToStream {
                stream: stream.to_string(),
                source,
            },
        }
    }
}
