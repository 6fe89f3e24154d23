//! 内存版日志存储（InMemoryLogStore）
//!
//! 实现全部边界协议，行为贴近真实日志存储：
//! - 按流追加并校验期望状态，记录全局顺序；
//! - 虚拟流：`$all` 与 `$ce-{category}`（类别流以链接记录承载，可选解析）；
//! - 持久订阅组：先投递积压记录再推送实时记录，ack/park 后不再重复投递，
//!   nack-retry 立即以递增的重试计数重新投递；
//! - 故障注入：`fail_next` 令后续调用返回 `Unavailable`，`drop_subscriptions` 断开订阅。
//!
//! 典型用途：测试环境与本地开发。缓冲区大小参数被忽略（通道无界）。
//!
use super::{
    ALL_STREAM, CATEGORY_STREAM_PREFIX, ConnectionFactory, Disposable, DropReason, EventData,
    ExpectedState, LogStoreClient, NackAction, PersistentSubscription,
    PersistentSubscriptionSettings, PersistentSubscriptionsClient, RecordedEvent, ResolvedRecord,
    Subscription, SubscriptionMessage, SubscriptionPosition,
};
use crate::error::StoreError;
use crate::settings::EventStoreSettings;
use async_trait::async_trait;
use chrono::Utc;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 链接记录的事件类型
const LINK_EVENT_TYPE: &str = "$>";

/// 一次 nack 的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRecord {
    pub event_id: Uuid,
    pub action: NackAction,
    pub reason: String,
}

type GroupKey = (String, String);

struct GroupState {
    settings: PersistentSubscriptionSettings,
    processed: HashSet<Uuid>,
    retries: HashMap<Uuid, u32>,
}

struct LiveSubscriber {
    id: u64,
    key: GroupKey,
    tx: mpsc::UnboundedSender<SubscriptionMessage>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Vec<RecordedEvent>>,
    log: Vec<RecordedEvent>,
    groups: HashMap<GroupKey, GroupState>,
    subscribers: Vec<LiveSubscriber>,
    acked: Vec<Uuid>,
    nacked: Vec<NackRecord>,
    failures: usize,
    clients_created: usize,
    clients_disposed: usize,
    next_subscriber: u64,
}

/// 内存日志存储；克隆后共享同一份状态
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绕过序列化直接写入原始记录（用于构造外来记录）
    pub fn append_raw(&self, stream: &str, events: Vec<EventData>) -> Result<i64, StoreError> {
        self.state.lock().append(stream, ExpectedState::Any, events)
    }

    /// 之后的 `n` 次远程调用返回 `Unavailable`
    pub fn fail_next(&self, n: usize) {
        self.state.lock().failures = n;
    }

    /// 断开全部活动订阅
    pub fn drop_subscriptions(&self, reason: DropReason) {
        let subscribers = std::mem::take(&mut self.state.lock().subscribers);
        for subscriber in subscribers {
            let _ = subscriber
                .tx
                .send(SubscriptionMessage::Dropped(reason.clone()));
        }
    }

    pub fn acked(&self) -> Vec<Uuid> {
        self.state.lock().acked.clone()
    }

    pub fn nacked(&self) -> Vec<NackRecord> {
        self.state.lock().nacked.clone()
    }

    pub fn clients_created(&self) -> usize {
        self.state.lock().clients_created
    }

    pub fn clients_disposed(&self) -> usize {
        self.state.lock().clients_disposed
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// 流当前的版本（最后一条记录的位置）
    pub fn stream_revision(&self, stream: &str) -> Option<u64> {
        self.state.lock().last_revision(stream)
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

fn category_of(stream: &str) -> Option<&str> {
    stream.split_once('-').map(|(category, _)| category)
}

// 链接记录的标识由目标事件标识派生，保证重复读取时一致
fn link_record(
    stream: &str,
    revision: u64,
    target: &RecordedEvent,
    resolve_links: bool,
) -> ResolvedRecord {
    let link = RecordedEvent {
        stream_id: stream.to_string(),
        event_id: Uuid::from_u128(target.event_id.as_u128() ^ u128::MAX),
        revision,
        event_type: LINK_EVENT_TYPE.to_string(),
        data: format!("{}@{}", target.revision, target.stream_id).into_bytes(),
        metadata: Vec::new(),
        created: target.created,
    };

    if resolve_links {
        ResolvedRecord {
            event: target.clone(),
            link: Some(link),
        }
    } else {
        ResolvedRecord::new(link)
    }
}

impl State {
    fn last_revision(&self, stream: &str) -> Option<u64> {
        self.streams
            .get(stream)
            .and_then(|events| events.last())
            .map(|e| e.revision)
    }

    fn append(
        &mut self,
        stream: &str,
        expected: ExpectedState,
        events: Vec<EventData>,
    ) -> Result<i64, StoreError> {
        let current = self.last_revision(stream);
        let satisfied = match expected {
            ExpectedState::Any => true,
            ExpectedState::NoStream => current.is_none(),
            ExpectedState::StreamExists => current.is_some(),
            ExpectedState::Revision(revision) => current == Some(revision),
        };
        if !satisfied {
            return Err(StoreError::WrongExpectedVersion {
                stream: stream.to_string(),
                expected,
                actual: current,
            });
        }

        for data in events {
            let revision = current_len(&self.streams, stream);
            let recorded = RecordedEvent {
                stream_id: stream.to_string(),
                event_id: data.event_id,
                revision,
                event_type: data.event_type,
                data: data.data,
                metadata: data.metadata,
                created: Utc::now(),
            };
            self.streams
                .entry(stream.to_string())
                .or_default()
                .push(recorded.clone());
            self.log.push(recorded.clone());
            self.deliver(&recorded);
        }

        Ok(self
            .last_revision(stream)
            .map(|revision| revision as i64)
            .unwrap_or(-1))
    }

    fn records_for(&self, stream: &str, resolve_links: bool) -> Option<Vec<ResolvedRecord>> {
        if stream == ALL_STREAM {
            return Some(
                self.log
                    .iter()
                    .filter(|e| !e.stream_id.starts_with('$'))
                    .cloned()
                    .map(ResolvedRecord::new)
                    .collect(),
            );
        }

        if let Some(category) = stream.strip_prefix(CATEGORY_STREAM_PREFIX) {
            let records: Vec<ResolvedRecord> = self
                .log
                .iter()
                .filter(|e| category_of(&e.stream_id) == Some(category))
                .enumerate()
                .map(|(i, e)| link_record(stream, i as u64, e, resolve_links))
                .collect();
            return (!records.is_empty()).then_some(records);
        }

        self.streams
            .get(stream)
            .map(|events| events.iter().cloned().map(ResolvedRecord::new).collect())
    }

    fn live_record(
        &self,
        stream: &str,
        event: &RecordedEvent,
        resolve_links: bool,
    ) -> Option<ResolvedRecord> {
        if stream == ALL_STREAM {
            return (!event.stream_id.starts_with('$')).then(|| ResolvedRecord::new(event.clone()));
        }

        if let Some(category) = stream.strip_prefix(CATEGORY_STREAM_PREFIX) {
            if category_of(&event.stream_id) != Some(category) {
                return None;
            }
            let position = self
                .log
                .iter()
                .filter(|e| category_of(&e.stream_id) == Some(category))
                .count()
                .saturating_sub(1);
            return Some(link_record(stream, position as u64, event, resolve_links));
        }

        (stream == event.stream_id).then(|| ResolvedRecord::new(event.clone()))
    }

    fn deliver(&mut self, event: &RecordedEvent) {
        let mut closed = Vec::new();
        for subscriber in &self.subscribers {
            let Some(group) = self.groups.get(&subscriber.key) else {
                continue;
            };
            let Some(record) = self.live_record(
                &subscriber.key.0,
                event,
                group.settings.resolve_link_tos,
            ) else {
                continue;
            };
            let message = SubscriptionMessage::Event {
                record,
                retry_count: Some(0),
            };
            if subscriber.tx.send(message).is_err() {
                closed.push(subscriber.id);
            }
        }
        self.subscribers.retain(|s| !closed.contains(&s.id));
    }
}

fn current_len(streams: &HashMap<String, Vec<RecordedEvent>>, stream: &str) -> u64 {
    streams.get(stream).map(|events| events.len() as u64).unwrap_or(0)
}

impl ConnectionFactory for InMemoryLogStore {
    fn create_client(
        &self,
        _settings: &EventStoreSettings,
    ) -> Result<Arc<dyn LogStoreClient>, StoreError> {
        self.state.lock().clients_created += 1;
        Ok(Arc::new(InMemoryClient::new(self.clone())))
    }

    fn create_persistent_subscriptions_client(
        &self,
        _settings: &EventStoreSettings,
    ) -> Result<Arc<dyn PersistentSubscriptionsClient>, StoreError> {
        self.state.lock().clients_created += 1;
        Ok(Arc::new(InMemoryClient::new(self.clone())))
    }
}

/// 由工厂构建的单个客户端句柄；释放后不再可用
struct InMemoryClient {
    store: InMemoryLogStore,
    disposed: AtomicBool,
}

impl InMemoryClient {
    fn new(store: InMemoryLogStore) -> Self {
        Self {
            store,
            disposed: AtomicBool::new(false),
        }
    }

    fn guard(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.disposed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("client disposed".into()));
        }
        self.store.take_failure()
    }
}

#[async_trait]
impl Disposable for InMemoryClient {
    async fn dispose(&self) -> Result<(), StoreError> {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.store.state.lock().clients_disposed += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl LogStoreClient for InMemoryClient {
    async fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedState,
        events: Vec<EventData>,
        cancel: &CancellationToken,
    ) -> Result<i64, StoreError> {
        self.guard(cancel)?;
        self.store.state.lock().append(stream, expected, events)
    }

    async fn read_stream_forward(
        &self,
        stream: &str,
        from: u64,
        max_count: Option<u64>,
        resolve_links: bool,
        cancel: &CancellationToken,
    ) -> Result<BoxStream<'static, Result<ResolvedRecord, StoreError>>, StoreError> {
        self.guard(cancel)?;
        let records = self
            .store
            .state
            .lock()
            .records_for(stream, resolve_links)
            .ok_or_else(|| StoreError::StreamNotFound {
                stream: stream.to_string(),
            })?;

        let take = max_count.map(|n| n as usize).unwrap_or(usize::MAX);
        let selected: Vec<Result<ResolvedRecord, StoreError>> = records
            .into_iter()
            .skip(from as usize)
            .take(take)
            .map(Ok)
            .collect();
        Ok(futures_util::stream::iter(selected).boxed())
    }
}

#[async_trait]
impl PersistentSubscriptionsClient for InMemoryClient {
    async fn create_to_stream(
        &self,
        stream: &str,
        group: &str,
        settings: &PersistentSubscriptionSettings,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        self.guard(cancel)?;
        let mut state = self.store.state.lock();
        let key = (stream.to_string(), group.to_string());
        if state.groups.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        state.groups.insert(
            key,
            GroupState {
                settings: settings.clone(),
                processed: HashSet::new(),
                retries: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn subscribe_to_stream(
        &self,
        stream: &str,
        group: &str,
        _buffer_size: usize,
        cancel: &CancellationToken,
    ) -> Result<Subscription, StoreError> {
        self.guard(cancel)?;
        let mut state = self.store.state.lock();
        let key = (stream.to_string(), group.to_string());
        let Some(group_state) = state.groups.get(&key) else {
            return Err(StoreError::Other(format!(
                "subscription group {group} on {stream} does not exist"
            )));
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if group_state.settings.start_from == SubscriptionPosition::Start {
            let backlog = state
                .records_for(stream, group_state.settings.resolve_link_tos)
                .unwrap_or_default();
            for record in backlog {
                if group_state.processed.contains(&record.original().event_id) {
                    continue;
                }
                let _ = tx.send(SubscriptionMessage::Event {
                    record,
                    retry_count: Some(0),
                });
            }
        }

        state.next_subscriber += 1;
        let id = state.next_subscriber;
        state.subscribers.push(LiveSubscriber {
            id,
            key: key.clone(),
            tx: tx.clone(),
        });

        let handle = InMemorySubscription {
            id: format!("{stream}::{group}::{id}"),
            key,
            store: self.store.clone(),
            tx,
        };
        Ok(Subscription {
            handle: Arc::new(handle),
            messages: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

struct InMemorySubscription {
    id: String,
    key: GroupKey,
    store: InMemoryLogStore,
    tx: mpsc::UnboundedSender<SubscriptionMessage>,
}

#[async_trait]
impl PersistentSubscription for InMemorySubscription {
    fn subscription_id(&self) -> &str {
        &self.id
    }

    async fn ack(&self, record: &ResolvedRecord) -> Result<(), StoreError> {
        let event_id = record.original().event_id;
        let mut state = self.store.state.lock();
        state.acked.push(event_id);
        if let Some(group) = state.groups.get_mut(&self.key) {
            group.processed.insert(event_id);
        }
        Ok(())
    }

    async fn nack(
        &self,
        action: NackAction,
        reason: &str,
        record: &ResolvedRecord,
    ) -> Result<(), StoreError> {
        let event_id = record.original().event_id;
        let mut state = self.store.state.lock();
        state.nacked.push(NackRecord {
            event_id,
            action,
            reason: reason.to_string(),
        });

        let Some(group) = state.groups.get_mut(&self.key) else {
            return Ok(());
        };
        match action {
            NackAction::Park | NackAction::Skip => {
                group.processed.insert(event_id);
            }
            NackAction::Retry => {
                let retries = group.retries.entry(event_id).or_insert(0);
                *retries += 1;
                let _ = self.tx.send(SubscriptionMessage::Event {
                    record: record.clone(),
                    retry_count: Some(*retries),
                });
            }
            NackAction::Stop => {}
        }
        Ok(())
    }
}
