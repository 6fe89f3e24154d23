//! 读门面（ReadEventStore）
//!
//! 所有读取均为正向读取并返回解码后的信封：
//! 外来记录与无法识别类型的记录被静默跳过；未开启 `resolve_events` 时跳过已解析的链接记录。
//!
use crate::client::{LogStoreClient, ResolvedRecord};
use crate::connection::{self, ClientHandle, ConnectionProvider, ConnectionStrategy};
use crate::error::{EventStoreError, EventStoreResult, StoreError};
use crate::event::ReadEnvelope;
use crate::serializer::{Decoded, Serializer};
use crate::settings::EventStoreSettings;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 读取窗口
#[derive(Debug, Clone, Copy)]
enum Window {
    All,
    /// 至给定位置（含）
    UntilPosition(u64),
    /// 跳过时间戳早于给定值的事件
    FromTimestamp(DateTime<Utc>),
    /// 遇到时间戳晚于给定值的事件即停止
    UntilTimestamp(DateTime<Utc>),
}

impl Window {
    fn max_count(self) -> Option<u64> {
        match self {
            Window::UntilPosition(position) => Some(position.saturating_add(1)),
            _ => None,
        }
    }
}

pub struct ReadEventStore {
    connections: Arc<ConnectionProvider>,
    strategy: Arc<dyn ConnectionStrategy>,
    serializer: Arc<Serializer>,
    settings: Arc<EventStoreSettings>,
}

impl ReadEventStore {
    pub(crate) fn new(
        connections: Arc<ConnectionProvider>,
        strategy: Arc<dyn ConnectionStrategy>,
        serializer: Arc<Serializer>,
        settings: Arc<EventStoreSettings>,
    ) -> Self {
        Self {
            connections,
            strategy,
            serializer,
            settings,
        }
    }

    pub async fn read_stream(
        &self,
        stream: &str,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        self.read(stream, 0, Window::All, cancel).await
    }

    pub async fn read_stream_from_position(
        &self,
        stream: &str,
        position: u64,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        self.read(stream, position, Window::All, cancel).await
    }

    /// 读取至 `position`（含），最多消费 `position + 1` 条记录
    pub async fn read_stream_until_position(
        &self,
        stream: &str,
        position: u64,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        self.read(stream, 0, Window::UntilPosition(position), cancel)
            .await
    }

    pub async fn read_stream_from_timestamp(
        &self,
        stream: &str,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        self.read(stream, 0, Window::FromTimestamp(timestamp), cancel)
            .await
    }

    /// 读取事件时间戳不晚于 `timestamp` 的前缀
    pub async fn read_stream_until_timestamp(
        &self,
        stream: &str,
        timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        self.read(stream, 0, Window::UntilTimestamp(timestamp), cancel)
            .await
    }

    async fn read(
        &self,
        stream: &str,
        from: u64,
        window: Window,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        let envelopes = connection::execute(self.strategy.as_ref(), cancel, move || {
            self.read_once(stream, from, window, cancel)
        })
        .await?;
        tracing::debug!(stream, count = envelopes.len(), "events read from stream");
        Ok(envelopes)
    }

    async fn read_once(
        &self,
        stream: &str,
        from: u64,
        window: Window,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Vec<ReadEnvelope>> {
        let client = self.connections.read_client()?;
        let resolve_events = self.settings.resolve_events;
        let mut records = match client
            .read_stream_forward(stream, from, window.max_count(), resolve_events, cancel)
            .await
        {
            Ok(records) => records,
            Err(err) => return Err(self.translate(stream, &client, err).await),
        };

        let mut envelopes = Vec::new();
        while let Some(record) = records.next().await {
            let record = match record {
                Ok(record) => record,
                Err(err) => return Err(self.translate(stream, &client, err).await),
            };
            if record.is_resolved() && !resolve_events {
                continue;
            }
            let Some(envelope) = self.decode(stream, &record)? else {
                continue;
            };

            let timestamp = envelope.event().event_timestamp();
            match window {
                Window::FromTimestamp(start) if timestamp < start => continue,
                Window::UntilTimestamp(until) if timestamp > until => break,
                _ => {}
            }
            envelopes.push(envelope);
            if let Window::UntilPosition(position) = window {
                if envelopes.len() as u64 > position {
                    break;
                }
            }
        }
        Ok(envelopes)
    }

    fn decode(
        &self,
        stream: &str,
        record: &ResolvedRecord,
    ) -> EventStoreResult<Option<ReadEnvelope>> {
        match self.serializer.deserialize(&record.event) {
            Ok(Decoded::Event(envelope)) => Ok(Some(envelope)),
            Ok(Decoded::Foreign) => Ok(None),
            Err(EventStoreError::UnknownEventType { type_token, .. }) => {
                tracing::debug!(
                    stream,
                    type_token = %type_token,
                    "skipping record of unknown type"
                );
                Ok(None)
            }
            Err(err) => Err(EventStoreError::ErrorReadingFromStream {
                stream: stream.to_string(),
                source: StoreError::Other(err.to_string()),
            }),
        }
    }

    async fn translate(
        &self,
        stream: &str,
        client: &ClientHandle<dyn LogStoreClient>,
        err: StoreError,
    ) -> EventStoreError {
        match err {
            StoreError::StreamNotFound { .. } => EventStoreError::StreamNotFound {
                stream: stream.to_string(),
            },
            StoreError::Unavailable(reason) => {
                tracing::warn!(stream, reason = %reason, "read client unavailable");
                self.connections.read_client_disconnected(client).await;
                EventStoreError::ConnectionFailed
            }
            StoreError::Cancelled => EventStoreError::Cancelled,
            source => EventStoreError::ErrorReadingFromStream {
                stream: stream.to_string(),
                source,
            },
        }
    }
}
