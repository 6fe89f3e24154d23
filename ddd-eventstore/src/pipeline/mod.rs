//! 订阅处理管道（pipeline）
//!
//! - `EventRegistry`：按事件类型登记处理器、行为、前后置处理器与追加钩子；
//! - `ExecutionPlan`：为单条记录组装的处理链；
//! - `ConsumerContext` / `RequestScope`：随记录传递的上下文与请求作用域资源；
//! - `OperationResult`：处理结果，由订阅器翻译为 ack / nack。
//!
mod context;
mod contracts;
mod plan;
mod registry;

pub use context::{ConsumerContext, ConsumerContextBuilder, OperationResult, RequestScope};
pub use contracts::{
    EventHandler, OpenPipelineBehavior, OpenPostAppendEventAction, OpenPostProcessor,
    OpenPreAppendEventAction, OpenPreProcessor, PipelineBehavior, PostAppendEventAction,
    PostProcessor, PreAppendEventAction, PreProcessor,
};
pub use plan::{ExecutionPlan, Next};
pub use registry::{EventRegistry, EventRegistryBuilder};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventStoreError;
    use crate::event::{AnyEvent, Event};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OrderCreated {
        id: Uuid,
        timestamp: DateTime<Utc>,
    }

    impl Event for OrderCreated {
        const NAME: &'static str = "OrderCreated";

        fn id(&self) -> Uuid {
            self.id
        }

        fn timestamp(&self) -> DateTime<Utc> {
            self.timestamp
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OrderCancelled {
        id: Uuid,
        timestamp: DateTime<Utc>,
    }

    impl Event for OrderCancelled {
        const NAME: &'static str = "OrderCancelled";

        fn id(&self) -> Uuid {
            self.id
        }

        fn timestamp(&self) -> DateTime<Utc> {
            self.timestamp
        }
    }

    fn created() -> OrderCreated {
        OrderCreated {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    struct Handler {
        journal: Journal,
        result: OperationResult,
    }

    #[async_trait]
    impl EventHandler<OrderCreated> for Handler {
        async fn handle(
            &self,
            _event: &OrderCreated,
            _ctx: &ConsumerContext,
        ) -> anyhow::Result<OperationResult> {
            self.journal.push("handler");
            Ok(self.result)
        }
    }

    fn handler(journal: &Journal) -> Handler {
        Handler {
            journal: journal.clone(),
            result: OperationResult::Ok,
        }
    }

    struct Around {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl OpenPipelineBehavior for Around {
        async fn execute(
            &self,
            _event: &dyn AnyEvent,
            _ctx: &ConsumerContext,
            next: Next<'_>,
        ) -> anyhow::Result<OperationResult> {
            self.journal.push(format!("{}:before", self.name));
            let result = next.run().await;
            self.journal.push(format!("{}:after", self.name));
            result
        }
    }

    #[async_trait]
    impl PipelineBehavior<OrderCreated> for Around {
        async fn execute(
            &self,
            _event: &OrderCreated,
            _ctx: &ConsumerContext,
            next: Next<'_>,
        ) -> anyhow::Result<OperationResult> {
            self.journal.push(format!("{}:before", self.name));
            let result = next.run().await;
            self.journal.push(format!("{}:after", self.name));
            result
        }
    }

    struct Step {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl PreProcessor<OrderCreated> for Step {
        async fn execute(
            &self,
            _event: &OrderCreated,
            _ctx: &ConsumerContext,
        ) -> anyhow::Result<()> {
            self.journal.push(self.name);
            Ok(())
        }
    }

    #[async_trait]
    impl OpenPreProcessor for Step {
        async fn execute(
            &self,
            _event: &dyn AnyEvent,
            _ctx: &ConsumerContext,
        ) -> anyhow::Result<()> {
            self.journal.push(self.name);
            Ok(())
        }
    }

    #[async_trait]
    impl PostProcessor<OrderCreated> for Step {
        async fn execute(
            &self,
            _event: &OrderCreated,
            _ctx: &ConsumerContext,
            result: OperationResult,
        ) -> anyhow::Result<OperationResult> {
            self.journal.push(self.name);
            Ok(result)
        }
    }

    async fn run(
        registry: &EventRegistry,
        event: &dyn AnyEvent,
    ) -> anyhow::Result<OperationResult> {
        let plan = registry.execution_plan(event).expect("handler registered");
        let ctx = ConsumerContext::builder()
            .stream_name("order-1")
            .scope(plan.scope())
            .build();
        plan.execute(event, &ctx).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn components_run_in_registration_order() {
        let journal = Journal::default();
        let step = |name| Step {
            name,
            journal: journal.clone(),
        };
        let around = |name| Around {
            name,
            journal: journal.clone(),
        };

        let registry = EventRegistry::builder()
            .open_behavior(around("open"))
            .handler::<OrderCreated, _>(handler(&journal))
            .behavior::<OrderCreated, _>(around("typed"))
            .pre_processor::<OrderCreated, _>(step("pre:typed"))
            .open_pre_processor(step("pre:open"))
            .post_processor::<OrderCreated, _>(step("post:typed"))
            .build()
            .unwrap();

        let result = run(&registry, &created()).await.unwrap();

        assert_eq!(result, OperationResult::Ok);
        assert_eq!(
            journal.entries(),
            vec![
                "open:before",
                "typed:before",
                "pre:typed",
                "pre:open",
                "handler",
                "post:typed",
                "typed:after",
                "open:after",
            ]
        );
    }

    struct ShortCircuit;

    #[async_trait]
    impl PipelineBehavior<OrderCreated> for ShortCircuit {
        async fn execute(
            &self,
            _event: &OrderCreated,
            _ctx: &ConsumerContext,
            _next: Next<'_>,
        ) -> anyhow::Result<OperationResult> {
            Ok(OperationResult::Park)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn behavior_can_short_circuit_the_handler() {
        let journal = Journal::default();
        let registry = EventRegistry::builder()
            .behavior::<OrderCreated, _>(ShortCircuit)
            .handler::<OrderCreated, _>(handler(&journal))
            .build()
            .unwrap();

        let result = run(&registry, &created()).await.unwrap();

        assert_eq!(result, OperationResult::Park);
        assert!(journal.entries().is_empty());
    }

    struct RetryOnce;

    #[async_trait]
    impl OpenPipelineBehavior for RetryOnce {
        async fn execute(
            &self,
            _event: &dyn AnyEvent,
            _ctx: &ConsumerContext,
            next: Next<'_>,
        ) -> anyhow::Result<OperationResult> {
            match next.run().await {
                Ok(OperationResult::ImmediateRetry) => next.run().await,
                other => other,
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn behavior_can_run_the_rest_of_the_chain_again() {
        let journal = Journal::default();
        let registry = EventRegistry::builder()
            .open_behavior(RetryOnce)
            .handler::<OrderCreated, _>(Handler {
                journal: journal.clone(),
                result: OperationResult::ImmediateRetry,
            })
            .build()
            .unwrap();

        let result = run(&registry, &created()).await.unwrap();

        assert_eq!(result, OperationResult::ImmediateRetry);
        assert_eq!(journal.entries(), vec!["handler", "handler"]);
    }

    struct Escalate;

    #[async_trait]
    impl OpenPostProcessor for Escalate {
        async fn execute(
            &self,
            _event: &dyn AnyEvent,
            ctx: &ConsumerContext,
            result: OperationResult,
        ) -> anyhow::Result<OperationResult> {
            Ok(match (result, ctx.retry_count()) {
                (OperationResult::ImmediateRetry, Some(count)) if count >= 3 => {
                    OperationResult::Park
                }
                (result, _) => result,
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_processor_can_replace_the_result() {
        let journal = Journal::default();
        let registry = EventRegistry::builder()
            .handler::<OrderCreated, _>(Handler {
                journal: journal.clone(),
                result: OperationResult::ImmediateRetry,
            })
            .open_post_processor(Escalate)
            .build()
            .unwrap();

        let event = created();
        let plan = registry.execution_plan(&event).unwrap();
        let ctx = ConsumerContext::builder()
            .stream_name("order-1")
            .retry_count(3)
            .scope(plan.scope())
            .build();

        assert_eq!(plan.execute(&event, &ctx).await.unwrap(), OperationResult::Park);
    }

    struct FailingStep;

    #[async_trait]
    impl PreProcessor<OrderCreated> for FailingStep {
        async fn execute(
            &self,
            _event: &OrderCreated,
            ctx: &ConsumerContext,
        ) -> anyhow::Result<()> {
            ctx.scope().insert(String::from("connection"));
            anyhow::bail!("validation failed")
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scope_is_released_when_the_chain_fails() {
        let journal = Journal::default();
        let registry = EventRegistry::builder()
            .pre_processor::<OrderCreated, _>(FailingStep)
            .handler::<OrderCreated, _>(handler(&journal))
            .build()
            .unwrap();

        let event = created();
        let plan = registry.execution_plan(&event).unwrap();
        let scope = plan.scope();
        let ctx = ConsumerContext::builder()
            .stream_name("order-1")
            .scope(scope.clone())
            .build();

        let err = plan.execute(&event, &ctx).await.unwrap_err();

        assert_eq!(err.to_string(), "validation failed");
        assert!(journal.entries().is_empty());
        assert!(scope.is_released());
        assert_eq!(scope.get::<String>(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scoped_components_are_built_per_plan() {
        let journal = Journal::default();
        let built = Arc::new(AtomicUsize::new(0));
        let registry = EventRegistry::builder()
            .scoped_handler::<OrderCreated, _, _>({
                let journal = journal.clone();
                let built = built.clone();
                move || {
                    built.fetch_add(1, Ordering::SeqCst);
                    handler(&journal)
                }
            })
            .build()
            .unwrap();

        run(&registry, &created()).await.unwrap();
        run(&registry, &created()).await.unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(journal.entries(), vec!["handler", "handler"]);
    }

    #[test]
    fn duplicate_handlers_are_a_configuration_error() {
        let journal = Journal::default();
        let result = EventRegistry::builder()
            .handler::<OrderCreated, _>(handler(&journal))
            .handler::<OrderCreated, _>(handler(&journal))
            .build();

        match result {
            Err(EventStoreError::Configuration { reason }) => {
                assert!(reason.contains("OrderCreated"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn events_without_handler_have_no_plan() {
        let registry = EventRegistry::builder()
            .event::<OrderCancelled>()
            .build()
            .unwrap();
        let cancelled = OrderCancelled {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };

        assert!(registry.execution_plan(&cancelled).is_none());
        assert!(!registry.has_handler(&cancelled));
        assert_eq!(registry.event_types().len(), 1);
    }
}
