//! 持久订阅器（PersistentSubscriber）
//!
//! 每个被订阅的流对应一个长驻任务，按投递顺序逐条处理记录：
//! 解码 → 组装执行计划 → 执行 → 将结果翻译为 ack / nack。
//! 订阅被断开时，按配置在同一任务内以原起始位置重新订阅。
//!
use crate::client::{
    ALL_STREAM, DropReason, NackAction, PersistentSubscription, PersistentSubscriptionSettings,
    PersistentSubscriptionsClient, ResolvedRecord, Subscription, SubscriptionMessage,
    SubscriptionPosition,
};
use crate::connection::{self, ClientHandle, ConnectionProvider, ConnectionStrategy};
use crate::error::{EventStoreError, EventStoreResult, StoreError};
use crate::pipeline::{ConsumerContext, EventRegistry, OperationResult};
use crate::serializer::{Decoded, Serializer};
use crate::settings::{EventStoreSettings, SubscriptionSettings};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DESERIALIZATION_FAILED: &str = "Error deserializing";

/// 消费循环的退出原因
enum Exit {
    Shutdown,
    Dropped(DropReason),
}

pub struct PersistentSubscriber {
    connections: Arc<ConnectionProvider>,
    strategy: Arc<dyn ConnectionStrategy>,
    serializer: Arc<Serializer>,
    registry: Arc<EventRegistry>,
    settings: Arc<EventStoreSettings>,
    active: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl PersistentSubscriber {
    pub(crate) fn new(
        connections: Arc<ConnectionProvider>,
        strategy: Arc<dyn ConnectionStrategy>,
        serializer: Arc<Serializer>,
        registry: Arc<EventRegistry>,
        settings: Arc<EventStoreSettings>,
    ) -> Self {
        Self {
            connections,
            strategy,
            serializer,
            registry,
            settings,
            active: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 订阅单个流（或类别流）；`$all` 须使用 `subscribe_to_all`
    pub async fn subscribe_to_stream(
        self: &Arc<Self>,
        stream: &str,
        position: SubscriptionPosition,
        cancel: &CancellationToken,
    ) -> EventStoreResult<()> {
        if stream == ALL_STREAM {
            return Err(EventStoreError::InvalidSubscriptionStream {
                stream: stream.to_string(),
            });
        }
        self.subscribe(stream, position, cancel).await
    }

    pub async fn subscribe_to_all(
        self: &Arc<Self>,
        position: SubscriptionPosition,
        cancel: &CancellationToken,
    ) -> EventStoreResult<()> {
        self.subscribe(ALL_STREAM, position, cancel).await
    }

    pub fn is_subscribed(&self, stream: &str) -> bool {
        self.active.contains_key(stream)
    }

    /// 停止全部消费循环；之后的订阅请求返回 `ConnectionsStopped`
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn subscribe(
        self: &Arc<Self>,
        stream: &str,
        position: SubscriptionPosition,
        cancel: &CancellationToken,
    ) -> EventStoreResult<()> {
        let group = self.subscription_settings()?.group.clone();
        if self.shutdown.is_cancelled() {
            return Err(EventStoreError::ConnectionsStopped);
        }
        if self.is_subscribed(stream) {
            return Ok(());
        }

        let subscription = self.establish(stream, position, cancel).await?;
        let token = self.shutdown.child_token();
        match self.active.entry(stream.to_string()) {
            Entry::Occupied(_) => {
                // 并发订阅已先行登记，本次建立的订阅随之丢弃
                tracing::debug!(
                    stream,
                    subscription_id = subscription.handle.subscription_id(),
                    "stream already subscribed, dropping duplicate subscription"
                );
                return Ok(());
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        tracing::info!(
            stream,
            group = %group,
            subscription_id = subscription.handle.subscription_id(),
            "subscribed to stream"
        );
        tokio::spawn(Self::consume_loop(
            self.clone(),
            stream.to_string(),
            position,
            subscription,
            token,
        ));
        Ok(())
    }

    fn subscription_settings(&self) -> EventStoreResult<&SubscriptionSettings> {
        self.settings
            .subscription
            .as_ref()
            .filter(|settings| !settings.group.is_empty())
            .ok_or_else(|| EventStoreError::configuration("subscription group is not configured"))
    }

    async fn establish(
        &self,
        stream: &str,
        position: SubscriptionPosition,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Subscription> {
        connection::execute(self.strategy.as_ref(), cancel, move || {
            self.establish_once(stream, position, cancel)
        })
        .await
    }

    async fn establish_once(
        &self,
        stream: &str,
        position: SubscriptionPosition,
        cancel: &CancellationToken,
    ) -> EventStoreResult<Subscription> {
        let subscription = self.subscription_settings()?;
        let group = subscription.group.as_str();
        let client = self.connections.persistent_subscriptions_client()?;
        let settings = PersistentSubscriptionSettings {
            resolve_link_tos: self.settings.resolve_events,
            start_from: position,
            subscription: subscription.clone(),
        };

        match client
            .create_to_stream(stream, group, &settings, cancel)
            .await
        {
            Ok(()) => tracing::info!(stream, group, "persistent subscription created"),
            Err(StoreError::AlreadyExists) => {}
            Err(err) => return Err(self.subscription_failed(stream, group, &client, err).await),
        }

        match client
            .subscribe_to_stream(stream, group, self.settings.subscription_buffer_size, cancel)
            .await
        {
            Ok(subscription) => Ok(subscription),
            Err(err) => Err(self.subscription_failed(stream, group, &client, err).await),
        }
    }

    async fn subscription_failed(
        &self,
        stream: &str,
        group: &str,
        client: &ClientHandle<dyn PersistentSubscriptionsClient>,
        err: StoreError,
    ) -> EventStoreError {
        match err {
            StoreError::Unavailable(reason) => {
                tracing::warn!(
                    stream,
                    group,
                    reason = %reason,
                    "persistent subscriptions client unavailable"
                );
                self.connections
                    .persistent_subscriptions_client_disconnected(client)
                    .await;
                EventStoreError::ConnectionFailed
            }
            StoreError::Cancelled => EventStoreError::Cancelled,
            err => {
                tracing::error!(stream, group, error = %err, "error subscribing to stream");
                EventStoreError::SubscriptionFailed {
                    stream: stream.to_string(),
                }
            }
        }
    }

    async fn consume_loop(
        self: Arc<Self>,
        stream: String,
        position: SubscriptionPosition,
        mut subscription: Subscription,
        token: CancellationToken,
    ) {
        let _active = Deregister {
            active: &self.active,
            stream: &stream,
        };
        loop {
            let reason = match self.consume(&stream, &mut subscription, &token).await {
                Exit::Shutdown => break,
                Exit::Dropped(reason) => reason,
            };

            if reason == DropReason::Disposed {
                tracing::debug!(stream = %stream, "subscription disposed");
                break;
            }
            if !self.settings.reconnect_on_subscription_dropped {
                tracing::error!(stream = %stream, reason = ?reason, "subscription dropped");
                break;
            }

            tracing::warn!(
                stream = %stream,
                reason = ?reason,
                "subscription dropped, resubscribing"
            );
            match self.establish(&stream, position, &token).await {
                Ok(next) => subscription = next,
                Err(err) => {
                    tracing::error!(stream = %stream, error = %err, "resubscribing failed");
                    break;
                }
            }
        }
    }

    async fn consume(
        &self,
        stream: &str,
        subscription: &mut Subscription,
        token: &CancellationToken,
    ) -> Exit {
        loop {
            let message = tokio::select! {
                _ = token.cancelled() => return Exit::Shutdown,
                message = subscription.messages.next() => message,
            };
            match message {
                Some(SubscriptionMessage::Event {
                    record,
                    retry_count,
                }) => {
                    let handle = subscription.handle.as_ref();
                    self.on_event_appeared(handle, &record, retry_count, token).await
                }
                Some(SubscriptionMessage::Dropped(reason)) => return Exit::Dropped(reason),
                None => {
                    return Exit::Dropped(DropReason::ServerError(format!(
                        "subscription to {stream} closed by the server"
                    )));
                }
            }
        }
    }

    async fn on_event_appeared(
        &self,
        subscription: &dyn PersistentSubscription,
        record: &ResolvedRecord,
        retry_count: Option<u32>,
        token: &CancellationToken,
    ) {
        // 链接记录即便不解析也需要确认
        if record.is_resolved() && !self.settings.resolve_events {
            ack(subscription, record).await;
        }

        let envelope = match self.serializer.deserialize(&record.event) {
            Ok(Decoded::Event(envelope)) => envelope,
            Ok(Decoded::Foreign) | Err(EventStoreError::UnknownEventType { .. }) => {
                if self.settings.treat_foreign_events_as_errors {
                    park(subscription, DESERIALIZATION_FAILED, record).await;
                } else {
                    ack(subscription, record).await;
                }
                return;
            }
            Err(err) => {
                tracing::error!(
                    stream = %record.event.stream_id,
                    retry_count = ?retry_count,
                    error = %err,
                    "failed to decode event"
                );
                park(subscription, &err.to_string(), record).await;
                return;
            }
        };

        let event = envelope.event();
        let event_type = event.event_type().name();
        tracing::debug!(
            stream = %record.event.stream_id,
            event_type,
            event_id = %event.event_id(),
            "event arrived"
        );

        let Some(plan) = self.registry.execution_plan(event) else {
            tracing::warn!(event_type, event_id = %event.event_id(), "handler for event not found");
            if self.settings.treat_missing_handlers_as_errors {
                let reason = format!("Handler for event of type {event_type} not found");
                park(subscription, &reason, record).await;
            } else {
                ack(subscription, record).await;
            }
            return;
        };

        let ctx = ConsumerContext::builder()
            .stream_name(record.event.stream_id.clone())
            .maybe_retry_count(retry_count)
            .maybe_metadata(envelope.metadata().cloned())
            .scope(plan.scope())
            .cancellation(token.child_token())
            .build();

        let outcome = AssertUnwindSafe(plan.execute(event, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic.as_ref()))));

        match outcome {
            Ok(OperationResult::Ok) => ack(subscription, record).await,
            Ok(OperationResult::Park) => nack(subscription, NackAction::Park, "", record).await,
            Ok(OperationResult::ImmediateRetry) => {
                nack(subscription, NackAction::Retry, "", record).await
            }
            // 交由存储的超时重投
            Ok(OperationResult::RetryByAbandon) => {}
            Err(err) => {
                tracing::error!(
                    stream = %record.event.stream_id,
                    event_type,
                    retry_count = ?retry_count,
                    error = %err,
                    "error handling event"
                );
                park(subscription, &err.to_string(), record).await;
            }
        }
    }
}

impl std::fmt::Debug for PersistentSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentSubscriber")
            .field("active", &self.active.len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// 消费循环以任何方式退出时注销该流
struct Deregister<'a> {
    active: &'a DashMap<String, CancellationToken>,
    stream: &'a str,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.active.remove(self.stream);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {detail}")
}

async fn ack(subscription: &dyn PersistentSubscription, record: &ResolvedRecord) {
    if let Err(err) = subscription.ack(record).await {
        tracing::error!(
            subscription_id = subscription.subscription_id(),
            event_id = %record.original().event_id,
            error = %err,
            "failed to ack event"
        );
    }
}

async fn park(subscription: &dyn PersistentSubscription, reason: &str, record: &ResolvedRecord) {
    nack(subscription, NackAction::Park, reason, record).await;
}

async fn nack(
    subscription: &dyn PersistentSubscription,
    action: NackAction,
    reason: &str,
    record: &ResolvedRecord,
) {
    if let Err(err) = subscription.nack(action, reason, record).await {
        tracing::error!(
            subscription_id = subscription.subscription_id(),
            event_id = %record.original().event_id,
            action = ?action,
            error = %err,
            "failed to nack event"
        );
    }
}
