//! 聚合工具库（ddd-aggregate）
//!
//! 在 `ddd-eventstore` 之上提供事件溯源聚合：
//! - `aggregate`：聚合核心状态、事件和类型与回放；
//! - `resolver`：聚合类型到流名的解析；
//! - `store`：聚合的创建、更新、重建与类别订阅。
//!
pub mod aggregate;
pub mod error;
pub mod resolver;
pub mod store;

pub use aggregate::{
    Aggregate, AggregateCore, AggregateEvent, AggregateRegistryExt, AggregateState, Entity,
};
pub use error::{AggregateError, AggregateResult};
pub use resolver::{AggregateByTypeResolver, AggregateStreamResolver};
pub use store::AggregateStore;

// 允许宏生成的 ::ddd_aggregate 路径在本 crate 的单元测试中解析
extern crate self as ddd_aggregate;

#[cfg(test)]
mod tests {
    use super::*;
    use ddd_eventstore::{ReadEnvelope, WriteEnvelope};
    use ddd_macros::{aggregate, aggregate_event, event};

    #[event]
    struct Opened {
        owner: String,
    }

    #[event]
    struct Deposited {
        amount: u64,
    }

    #[event]
    struct Unrelated {}

    #[aggregate_event]
    enum AccountEvent {
        Opened(Opened),
        Deposited(Deposited),
    }

    #[aggregate(event = AccountEvent)]
    struct Account {
        owner: String,
        balance: u64,
    }

    impl Aggregate for Account {
        fn apply(&mut self, event: &AccountEvent) {
            match event {
                AccountEvent::Opened(e) => self.owner = e.owner.clone(),
                AccountEvent::Deposited(e) => self.balance += e.amount,
            }
        }
    }

    fn opened(owner: &str) -> Opened {
        Opened {
            id: ddd_eventstore::event::Uuid::new_v4(),
            timestamp: ddd_eventstore::event::Utc::now(),
            owner: owner.to_string(),
        }
    }

    fn deposited(amount: u64) -> Deposited {
        Deposited {
            id: ddd_eventstore::event::Uuid::new_v4(),
            timestamp: ddd_eventstore::event::Utc::now(),
            amount,
        }
    }

    fn history(events: Vec<WriteEnvelope>) -> Vec<ReadEnvelope> {
        events
            .into_iter()
            .enumerate()
            .map(|(i, envelope)| {
                let (event, metadata) = envelope.into_parts();
                ReadEnvelope::new(event, metadata, "account-a1".to_string(), i as u64)
            })
            .collect()
    }

    #[test]
    fn raise_moves_through_lifecycle_states() {
        let mut account = Account::new("a1".into());
        assert_eq!(account.core().state(), AggregateState::New);
        assert_eq!(account.version(), -1);

        account.raise(opened("alice"));
        account.raise(deposited(30));
        assert_eq!(account.core().state(), AggregateState::Modified);
        assert_eq!(account.version(), 1);
        assert_eq!(account.uncommitted_changes().len(), 2);
        assert_eq!(account.balance, 30);

        account.core_mut().mark_committed();
        assert_eq!(account.core().state(), AggregateState::Committed);
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn replay_matches_live_application_without_buffering() {
        let mut live = Account::new("a1".into());
        live.raise(opened("alice"));
        live.raise(deposited(10));
        live.raise(deposited(5));

        let envelopes = live
            .uncommitted_changes()
            .iter()
            .cloned()
            .map(AggregateEvent::into_envelope)
            .collect();
        let mut replayed = Account::new("a1".into());
        replayed.load_from_history(&history(envelopes)).unwrap();

        assert_eq!(replayed.version(), live.version());
        assert_eq!(replayed.balance, live.balance);
        assert_eq!(replayed.owner, "alice");
        assert!(replayed.uncommitted_changes().is_empty());
    }

    #[test]
    fn replay_rejects_events_outside_the_sum_type() {
        let stray = WriteEnvelope::new(Unrelated {
            id: ddd_eventstore::event::Uuid::new_v4(),
            timestamp: ddd_eventstore::event::Utc::now(),
        });
        let mut account = Account::new("a1".into());
        let err = account.load_from_history(&history(vec![stray])).unwrap_err();

        assert!(matches!(
            err,
            AggregateError::UnexpectedEvent {
                aggregate: "Account",
                event_type: "Unrelated"
            }
        ));
    }
}
