#![cfg(feature = "in-memory")]

use async_trait::async_trait;
use ddd_eventstore::client::{EventData, InMemoryLogStore};
use ddd_eventstore::connection::{FixedRetryStrategy, NoRetryStrategy};
use ddd_eventstore::event::{DateTime, EventTypes, Metadata, Utc, Uuid};
use ddd_eventstore::pipeline::{OpenPostAppendEventAction, PreAppendEventAction};
use ddd_eventstore::serializer::Serializer;
use ddd_eventstore::{
    AnyEvent, EventRegistry, EventStore, EventStoreError, EventStoreSettings, WriteEnvelope,
};
use ddd_macros::event;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[event]
struct OrderPlaced {
    order_id: String,
}

#[event]
struct OrderShipped {
    order_id: String,
}

#[event(name = "OrderCancelled")]
struct Cancelled {
    order_id: String,
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
}

fn placed(order_id: &str, timestamp: DateTime<Utc>) -> OrderPlaced {
    OrderPlaced {
        id: Uuid::new_v4(),
        timestamp,
        order_id: order_id.to_string(),
    }
}

fn shipped(order_id: &str, timestamp: DateTime<Utc>) -> OrderShipped {
    OrderShipped {
        id: Uuid::new_v4(),
        timestamp,
        order_id: order_id.to_string(),
    }
}

fn registry() -> EventRegistry {
    EventRegistry::builder()
        .event::<OrderPlaced>()
        .event::<OrderShipped>()
        .event::<Cancelled>()
        .build()
        .unwrap()
}

fn store_with(log: &InMemoryLogStore, registry: EventRegistry) -> EventStore {
    EventStore::builder()
        .settings(EventStoreSettings::default())
        .factory(Arc::new(log.clone()))
        .registry(registry)
        .strategy(Arc::new(NoRetryStrategy))
        .build()
}

async fn seeded(log: &InMemoryLogStore) -> EventStore {
    let store = store_with(log, registry());
    let cancel = CancellationToken::new();
    store
        .write()
        .save("order-1", vec![placed("1", at(0)).into()], &cancel)
        .await
        .unwrap();
    store
        .write()
        .append("order-1", vec![shipped("1", at(1)).into()], &cancel)
        .await
        .unwrap();
    store
        .write()
        .append_with_version(
            "order-1",
            vec![WriteEnvelope::new(Cancelled {
                id: Uuid::new_v4(),
                timestamp: at(2),
                order_id: "1".into(),
            })],
            1,
            &cancel,
        )
        .await
        .unwrap();
    store
}

#[tokio::test(flavor = "multi_thread")]
async fn appended_events_are_read_back_in_order() {
    let log = InMemoryLogStore::new();
    let store = seeded(&log).await;
    let cancel = CancellationToken::new();

    let events = store.read().read_stream("order-1", &cancel).await.unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.event().event_type().name()).collect();
    assert_eq!(names, ["OrderPlaced", "OrderShipped", "OrderCancelled"]);
    assert_eq!(events[0].downcast_ref::<OrderPlaced>().unwrap().order_id, "1");
    assert_eq!(events[2].revision(), 2);
    assert_eq!(events[2].stream(), "order-1");

    let prefix = store
        .read()
        .read_stream_until_position("order-1", 1, &cancel)
        .await
        .unwrap();
    assert_eq!(prefix.len(), 2);

    let suffix = store
        .read()
        .read_stream_from_position("order-1", 1, &cancel)
        .await
        .unwrap();
    assert_eq!(suffix.len(), 2);
    assert!(suffix[0].event().is::<OrderShipped>());
}

#[tokio::test(flavor = "multi_thread")]
async fn save_returns_last_position_and_rejects_existing_streams() {
    let log = InMemoryLogStore::new();
    let store = store_with(&log, registry());
    let cancel = CancellationToken::new();

    let next = store
        .write()
        .save(
            "order-2",
            vec![placed("2", at(0)).into(), shipped("2", at(1)).into()],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(next, 1);

    let err = store
        .write()
        .save("order-2", vec![placed("2", at(2)).into()], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventStoreError::StreamAlreadyExists { ref stream } if stream == "order-2"
    ));
    assert_eq!(
        err.to_string(),
        "Trying to create stream order-2 but already exists"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn version_mismatch_reports_expected_and_actual() {
    let log = InMemoryLogStore::new();
    let store = seeded(&log).await;
    let cancel = CancellationToken::new();

    let err = store
        .write()
        .append_with_version("order-1", vec![shipped("1", at(3)).into()], 0, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventStoreError::MismatchExpectedVersion {
            expected: 0,
            actual: 2,
            ..
        }
    ));

    let err = store
        .write()
        .append_with_version("order-9", vec![shipped("9", at(3)).into()], 4, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventStoreError::MismatchExpectedVersion {
            expected: 4,
            actual: -1,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn negative_expected_version_requires_a_new_stream() {
    let log = InMemoryLogStore::new();
    let store = store_with(&log, registry());
    let cancel = CancellationToken::new();

    store
        .write()
        .append_with_version("order-3", vec![placed("3", at(0)).into()], -1, &cancel)
        .await
        .unwrap();
    assert_eq!(log.stream_revision("order-3"), Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn append_to_missing_stream_fails() {
    let log = InMemoryLogStore::new();
    let store = store_with(&log, registry());
    let cancel = CancellationToken::new();

    let err = store
        .write()
        .append("order-4", vec![placed("4", at(0)).into()], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventStoreError::ErrorAppendingEventsToStream { ref stream, .. } if stream == "order-4"
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn reading_a_missing_stream_reports_not_found() {
    let log = InMemoryLogStore::new();
    let store = store_with(&log, registry());

    let err = store
        .read()
        .read_stream("nothing-here", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EventStoreError::StreamNotFound { .. }));
    assert_eq!(err.to_string(), "Stream nothing-here was not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_and_unknown_records_are_skipped() {
    let log = InMemoryLogStore::new();
    let store = seeded(&log).await;
    let cancel = CancellationToken::new();

    log.append_raw(
        "order-1",
        vec![EventData {
            event_id: Uuid::new_v4(),
            event_type: "legacy-import".into(),
            data: br#"{"anything":true}"#.to_vec(),
            metadata: Vec::new(),
        }],
    )
    .unwrap();

    // 由仅知道 OrderPlaced 的实例读取：其余类型视为未知
    let narrow = store_with(
        &log,
        EventRegistry::builder().event::<OrderPlaced>().build().unwrap(),
    );
    let events = narrow.read().read_stream("order-1", &cancel).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].event().is::<OrderPlaced>());

    let events = store.read().read_stream("order-1", &cancel).await.unwrap();
    assert_eq!(events.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_payload_of_a_known_type_fails_the_read() {
    let log = InMemoryLogStore::new();
    let store = store_with(&log, registry());

    let mut types = EventTypes::new();
    types.register::<OrderPlaced>();
    let mut data = Serializer::new(Arc::new(types))
        .serialize(&placed("5", at(0)).into())
        .unwrap();
    data.data = b"not json".to_vec();
    log.append_raw("order-5", vec![data]).unwrap();

    let err = store
        .read()
        .read_stream("order-5", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EventStoreError::ErrorReadingFromStream { ref stream, .. } if stream == "order-5"
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn timestamp_windows_filter_by_event_time() {
    let log = InMemoryLogStore::new();
    let store = seeded(&log).await;
    let cancel = CancellationToken::new();

    let from = store
        .read()
        .read_stream_from_timestamp("order-1", at(1), &cancel)
        .await
        .unwrap();
    assert_eq!(from.len(), 2);
    assert!(from[0].event().is::<OrderShipped>());

    let until = store
        .read()
        .read_stream_until_timestamp("order-1", at(1), &cancel)
        .await
        .unwrap();
    assert_eq!(until.len(), 2);
    assert!(until[1].event().is::<OrderShipped>());
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_round_trips_and_empty_metadata_is_preserved() {
    let log = InMemoryLogStore::new();
    let store = store_with(&log, registry());
    let cancel = CancellationToken::new();

    let mut metadata = Metadata::new();
    metadata.insert("correlation-id".into(), "c-42".into());
    store
        .write()
        .save(
            "order-6",
            vec![
                WriteEnvelope::with_metadata(placed("6", at(0)), metadata.clone()),
                WriteEnvelope::with_metadata(shipped("6", at(1)), Metadata::new()),
                shipped("6", at(2)).into(),
            ],
            &cancel,
        )
        .await
        .unwrap();

    let events = store.read().read_stream("order-6", &cancel).await.unwrap();
    assert_eq!(events[0].metadata(), Some(&metadata));
    assert_eq!(events[1].metadata(), Some(&Metadata::new()));
    assert_eq!(events[2].metadata(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried_with_fresh_handles() {
    let log = InMemoryLogStore::new();
    let store = EventStore::builder()
        .settings(EventStoreSettings::default())
        .factory(Arc::new(log.clone()))
        .registry(registry())
        .strategy(Arc::new(
            FixedRetryStrategy::builder()
                .max_attempts(3)
                .delay(Duration::from_millis(5))
                .build(),
        ))
        .build();
    let cancel = CancellationToken::new();

    log.fail_next(2);
    store
        .write()
        .save("order-7", vec![placed("7", at(0)).into()], &cancel)
        .await
        .unwrap();
    assert_eq!(log.stream_revision("order-7"), Some(0));
    assert!(log.clients_disposed() >= 2);

    log.fail_next(3);
    let err = store
        .read()
        .read_stream("order-7", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EventStoreError::ConnectionFailed));

    let events = store.read().read_stream("order-7", &cancel).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_store_refuses_further_calls() {
    let log = InMemoryLogStore::new();
    let store = seeded(&log).await;
    let cancel = CancellationToken::new();

    store.stop_connections().await;
    store.stop_connections().await;

    let err = store.read().read_stream("order-1", &cancel).await.unwrap_err();
    assert!(matches!(err, EventStoreError::ConnectionsStopped));
}

struct StampTenant;

#[async_trait]
impl PreAppendEventAction<OrderPlaced> for StampTenant {
    async fn execute(
        &self,
        event: &OrderPlaced,
        metadata: &mut Option<Metadata>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        metadata
            .get_or_insert_with(Metadata::new)
            .insert("order".into(), event.order_id.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Appended(Arc<Mutex<Vec<Uuid>>>);

#[async_trait]
impl OpenPostAppendEventAction for Appended {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.0.lock().push(event.event_id());
        Ok(())
    }
}

struct Reject;

#[async_trait]
impl PreAppendEventAction<OrderShipped> for Reject {
    async fn execute(
        &self,
        _event: &OrderShipped,
        _metadata: &mut Option<Metadata>,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        anyhow::bail!("shipping is closed")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn append_hooks_run_around_the_write() {
    let log = InMemoryLogStore::new();
    let appended = Appended::default();
    let registry = EventRegistry::builder()
        .event::<OrderShipped>()
        .pre_append_action::<OrderPlaced, _>(StampTenant)
        .open_post_append_action(appended.clone())
        .build()
        .unwrap();
    let store = store_with(&log, registry);
    let cancel = CancellationToken::new();

    let first = placed("8", at(0));
    let second = shipped("8", at(1));
    store
        .write()
        .save("order-8", vec![first.clone().into(), second.clone().into()], &cancel)
        .await
        .unwrap();

    let events = store.read().read_stream("order-8", &cancel).await.unwrap();
    assert_eq!(
        events[0].metadata().and_then(|m| m.get("order")).map(String::as_str),
        Some("8")
    );
    assert_eq!(events[1].metadata(), None);
    assert_eq!(*appended.0.lock(), vec![first.id, second.id]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_pre_append_hook_aborts_the_write() {
    let log = InMemoryLogStore::new();
    let registry = EventRegistry::builder()
        .event::<OrderPlaced>()
        .pre_append_action::<OrderShipped, _>(Reject)
        .build()
        .unwrap();
    let store = store_with(&log, registry);

    let err = store
        .write()
        .save(
            "order-9",
            vec![placed("9", at(0)).into(), shipped("9", at(1)).into()],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EventStoreError::Hook { .. }));
    assert_eq!(log.stream_revision("order-9"), None);
}
