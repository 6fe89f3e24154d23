use ddd_aggregate::{Aggregate, AggregateEvent, Entity};
use ddd_eventstore::event::{DateTime, Utc, Uuid};
use ddd_eventstore::{AnyEvent, Event, EventRegistry};
use ddd_macros::{aggregate, aggregate_event, event};

#[event]
struct ItemAdded {
    sku: String,
    quantity: u32,
}

#[event(name = "ItemRemovedV2")]
struct ItemRemoved {
    sku: String,
}

// 已声明的 id / timestamp 被复用并移到最前
#[event]
#[derive(Default)]
struct CartCleared {
    reason: Option<String>,
    timestamp: DateTime<Utc>,
    id: Uuid,
}

#[aggregate_event]
enum CartEvent {
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
}

#[aggregate(event = CartEvent, name = "ShoppingCart")]
struct Cart {
    items: Vec<(String, u32)>,
}

impl Aggregate for Cart {
    fn apply(&mut self, event: &CartEvent) {
        match event {
            CartEvent::ItemAdded(e) => self.items.push((e.sku.clone(), e.quantity)),
            CartEvent::ItemRemoved(e) => self.items.retain(|(sku, _)| sku != &e.sku),
        }
    }
}

fn added(sku: &str, quantity: u32) -> ItemAdded {
    ItemAdded {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        sku: sku.to_string(),
        quantity,
    }
}

#[test]
fn event_exposes_identity_and_name() {
    let event = added("apple", 2);
    assert_eq!(ItemAdded::NAME, "ItemAdded");
    assert_eq!(ItemRemoved::NAME, "ItemRemovedV2");
    assert_eq!(Event::id(&event), event.id);
    assert_eq!(event.event_timestamp(), event.timestamp);
    assert_eq!(event.event_type().name(), "ItemAdded");
}

#[test]
fn event_serializes_with_leading_identity_fields() {
    let event = added("apple", 2);
    let json = serde_json::to_value(&event).unwrap();
    let keys: Vec<&str> = json
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    for key in ["id", "timestamp", "sku", "quantity"] {
        assert!(keys.contains(&key), "missing {key}");
    }

    let back: ItemAdded = serde_json::from_value(json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn existing_identity_fields_are_reused() {
    let cleared = CartCleared::default();
    assert_eq!(cleared.id, Uuid::nil());
    assert_eq!(cleared.reason, None);
    assert_eq!(Event::timestamp(&cleared), cleared.timestamp);
}

#[test]
fn aggregate_event_converts_both_ways() {
    let event = added("pear", 1);
    let wrapped: CartEvent = event.clone().into();
    assert!(matches!(&wrapped, CartEvent::ItemAdded(e) if e == &event));
    assert_eq!(wrapped.as_event().event_id(), event.id);

    let erased: &dyn AnyEvent = &event;
    assert!(matches!(CartEvent::from_event(erased), Some(CartEvent::ItemAdded(_))));

    let foreign = CartCleared::default();
    assert!(CartEvent::from_event(&foreign).is_none());

    let envelope = wrapped.into_envelope();
    assert_eq!(envelope.event().event_id(), event.id);
    assert!(envelope.metadata().is_none());
}

#[test]
fn aggregate_event_registers_its_variants() {
    let registry = CartEvent::register(EventRegistry::builder()).build().unwrap();
    let types = registry.event_types();
    assert_eq!(types.len(), 2);
}

#[test]
fn aggregate_gets_core_and_type_name() {
    assert_eq!(Cart::TYPE_NAME, "ShoppingCart");

    let mut cart = Cart::new("c1".into());
    assert_eq!(cart.id(), "c1");
    assert_eq!(cart.version(), -1);
    assert!(cart.items.is_empty());

    cart.raise(added("apple", 3));
    cart.raise(ItemRemoved {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        sku: "apple".into(),
    });
    assert_eq!(cart.version(), 1);
    assert_eq!(cart.uncommitted_changes().len(), 2);
    assert!(cart.items.is_empty());
}
