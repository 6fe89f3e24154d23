//! 事件注册表（EventRegistry）
//!
//! 以事件具体类型的 `TypeId` 为键，保存处理器与各类处理链组件；
//! 开放组件对所有事件类型生效，与强类型组件共用一个注册序号，执行时按序号交错。
//!
//! 组件有两种生命周期：
//! - 单例：注册时给出实例，所有记录共享；
//! - 作用域：注册时给出工厂，每条记录组装执行计划时构建一次。
//!
use super::context::{ConsumerContext, OperationResult};
use super::contracts::{
    ErasedHandler, EventHandler, OpenPipelineBehavior, OpenPostAppendEventAction,
    OpenPostProcessor, OpenPreAppendEventAction, OpenPreProcessor, PipelineBehavior,
    PostAppendEventAction, PostProcessor, PreAppendEventAction, PreProcessor,
};
use super::plan::{ExecutionPlan, Next, Terminal};
use crate::error::{EventStoreError, EventStoreResult};
use crate::event::{AnyEvent, Event, EventTypes, Metadata};
use async_trait::async_trait;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Resolve<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Entry<T: ?Sized> {
    order: usize,
    resolve: Resolve<T>,
}

fn singleton<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> Resolve<T> {
    Arc::new(move || instance.clone())
}

#[derive(Default)]
struct Components {
    handler: Option<Entry<dyn ErasedHandler>>,
    behaviors: Vec<Entry<dyn OpenPipelineBehavior>>,
    pre_processors: Vec<Entry<dyn OpenPreProcessor>>,
    post_processors: Vec<Entry<dyn OpenPostProcessor>>,
    pre_append: Vec<Entry<dyn OpenPreAppendEventAction>>,
    post_append: Vec<Entry<dyn OpenPostAppendEventAction>>,
}

type Slot<T> = fn(&mut Components) -> &mut Vec<Entry<T>>;

/// 将强类型组件适配为开放组件
struct Typed<E, C> {
    inner: C,
    _event: PhantomData<fn() -> E>,
}

impl<E, C> Typed<E, C> {
    fn new(inner: C) -> Self {
        Self {
            inner,
            _event: PhantomData,
        }
    }
}

fn downcast<E: Event>(event: &dyn AnyEvent) -> anyhow::Result<&E> {
    event.downcast_ref::<E>().ok_or_else(|| {
        anyhow::anyhow!(
            "event type mismatch: expected {}, found {}",
            E::NAME,
            event.event_type().name()
        )
    })
}

#[async_trait]
impl<E: Event, H: EventHandler<E>> ErasedHandler for Typed<E, H> {
    async fn handle(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
    ) -> anyhow::Result<OperationResult> {
        self.inner.handle(downcast::<E>(event)?, ctx).await
    }
}

#[async_trait]
impl<E: Event, B: PipelineBehavior<E>> OpenPipelineBehavior for Typed<E, B> {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
        next: Next<'_>,
    ) -> anyhow::Result<OperationResult> {
        self.inner.execute(downcast::<E>(event)?, ctx, next).await
    }
}

#[async_trait]
impl<E: Event, P: PreProcessor<E>> OpenPreProcessor for Typed<E, P> {
    async fn execute(&self, event: &dyn AnyEvent, ctx: &ConsumerContext) -> anyhow::Result<()> {
        self.inner.execute(downcast::<E>(event)?, ctx).await
    }
}

#[async_trait]
impl<E: Event, P: PostProcessor<E>> OpenPostProcessor for Typed<E, P> {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
        result: OperationResult,
    ) -> anyhow::Result<OperationResult> {
        self.inner.execute(downcast::<E>(event)?, ctx, result).await
    }
}

#[async_trait]
impl<E: Event, A: PreAppendEventAction<E>> OpenPreAppendEventAction for Typed<E, A> {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        metadata: &mut Option<Metadata>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.inner
            .execute(downcast::<E>(event)?, metadata, cancel)
            .await
    }
}

#[async_trait]
impl<E: Event, A: PostAppendEventAction<E>> OpenPostAppendEventAction for Typed<E, A> {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.inner.execute(downcast::<E>(event)?, cancel).await
    }
}

/// 注册表构建器
///
/// 注册处理器或组件时会同时登记其事件类型；仅需解码而无需处理的类型用 `event` 登记。
#[derive(Default)]
pub struct EventRegistryBuilder {
    types: EventTypes,
    typed: HashMap<TypeId, Components>,
    open: Components,
    order: usize,
    duplicate_handlers: Vec<&'static str>,
}

impl EventRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记可解码的事件类型
    pub fn event<E: Event>(mut self) -> Self {
        self.types.register::<E>();
        self
    }

    pub fn handler<E, H>(self, handler: H) -> Self
    where
        E: Event,
        H: EventHandler<E> + 'static,
    {
        let handler: Arc<dyn ErasedHandler> = Arc::new(Typed::<E, H>::new(handler));
        self.with_handler::<E>(singleton(handler))
    }

    /// 作用域处理器：每条记录构建一次
    pub fn scoped_handler<E, H, F>(self, factory: F) -> Self
    where
        E: Event,
        H: EventHandler<E> + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.with_handler::<E>(Arc::new(move || {
            Arc::new(Typed::<E, H>::new(factory())) as Arc<dyn ErasedHandler>
        }))
    }

    pub fn behavior<E, B>(self, behavior: B) -> Self
    where
        E: Event,
        B: PipelineBehavior<E> + 'static,
    {
        let behavior: Arc<dyn OpenPipelineBehavior> = Arc::new(Typed::<E, B>::new(behavior));
        self.with_typed::<E, _>(|c| &mut c.behaviors, singleton(behavior))
    }

    pub fn scoped_behavior<E, B, F>(self, factory: F) -> Self
    where
        E: Event,
        B: PipelineBehavior<E> + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.with_typed::<E, _>(
            |c| &mut c.behaviors,
            Arc::new(move || {
                Arc::new(Typed::<E, B>::new(factory())) as Arc<dyn OpenPipelineBehavior>
            }),
        )
    }

    /// 对所有事件类型生效的行为
    pub fn open_behavior<B: OpenPipelineBehavior + 'static>(self, behavior: B) -> Self {
        let behavior: Arc<dyn OpenPipelineBehavior> = Arc::new(behavior);
        self.with_open(|c| &mut c.behaviors, singleton(behavior))
    }

    pub fn scoped_open_behavior<B, F>(self, factory: F) -> Self
    where
        B: OpenPipelineBehavior + 'static,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.with_open(
            |c| &mut c.behaviors,
            Arc::new(move || Arc::new(factory()) as Arc<dyn OpenPipelineBehavior>),
        )
    }

    pub fn pre_processor<E, P>(self, processor: P) -> Self
    where
        E: Event,
        P: PreProcessor<E> + 'static,
    {
        let processor: Arc<dyn OpenPreProcessor> = Arc::new(Typed::<E, P>::new(processor));
        self.with_typed::<E, _>(|c| &mut c.pre_processors, singleton(processor))
    }

    pub fn scoped_pre_processor<E, P, F>(self, factory: F) -> Self
    where
        E: Event,
        P: PreProcessor<E> + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.with_typed::<E, _>(
            |c| &mut c.pre_processors,
            Arc::new(move || {
                Arc::new(Typed::<E, P>::new(factory())) as Arc<dyn OpenPreProcessor>
            }),
        )
    }

    pub fn open_pre_processor<P: OpenPreProcessor + 'static>(self, processor: P) -> Self {
        let processor: Arc<dyn OpenPreProcessor> = Arc::new(processor);
        self.with_open(|c| &mut c.pre_processors, singleton(processor))
    }

    pub fn post_processor<E, P>(self, processor: P) -> Self
    where
        E: Event,
        P: PostProcessor<E> + 'static,
    {
        let processor: Arc<dyn OpenPostProcessor> = Arc::new(Typed::<E, P>::new(processor));
        self.with_typed::<E, _>(|c| &mut c.post_processors, singleton(processor))
    }

    pub fn scoped_post_processor<E, P, F>(self, factory: F) -> Self
    where
        E: Event,
        P: PostProcessor<E> + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.with_typed::<E, _>(
            |c| &mut c.post_processors,
            Arc::new(move || {
                Arc::new(Typed::<E, P>::new(factory())) as Arc<dyn OpenPostProcessor>
            }),
        )
    }

    pub fn open_post_processor<P: OpenPostProcessor + 'static>(self, processor: P) -> Self {
        let processor: Arc<dyn OpenPostProcessor> = Arc::new(processor);
        self.with_open(|c| &mut c.post_processors, singleton(processor))
    }

    pub fn pre_append_action<E, A>(self, action: A) -> Self
    where
        E: Event,
        A: PreAppendEventAction<E> + 'static,
    {
        let action: Arc<dyn OpenPreAppendEventAction> = Arc::new(Typed::<E, A>::new(action));
        self.with_typed::<E, _>(|c| &mut c.pre_append, singleton(action))
    }

    pub fn open_pre_append_action<A: OpenPreAppendEventAction + 'static>(self, action: A) -> Self {
        let action: Arc<dyn OpenPreAppendEventAction> = Arc::new(action);
        self.with_open(|c| &mut c.pre_append, singleton(action))
    }

    pub fn post_append_action<E, A>(self, action: A) -> Self
    where
        E: Event,
        A: PostAppendEventAction<E> + 'static,
    {
        let action: Arc<dyn OpenPostAppendEventAction> = Arc::new(Typed::<E, A>::new(action));
        self.with_typed::<E, _>(|c| &mut c.post_append, singleton(action))
    }

    pub fn open_post_append_action<A: OpenPostAppendEventAction + 'static>(
        self,
        action: A,
    ) -> Self {
        let action: Arc<dyn OpenPostAppendEventAction> = Arc::new(action);
        self.with_open(|c| &mut c.post_append, singleton(action))
    }

    /// 完成构建；同一事件类型注册了多个处理器时报配置错误
    pub fn build(self) -> EventStoreResult<EventRegistry> {
        if !self.duplicate_handlers.is_empty() {
            return Err(EventStoreError::configuration(format!(
                "multiple handlers registered for: {}",
                self.duplicate_handlers.join(", ")
            )));
        }

        tracing::debug!(
            event_types = self.types.len(),
            handlers = self.typed.values().filter(|c| c.handler.is_some()).count(),
            "event registry built"
        );
        Ok(EventRegistry {
            types: Arc::new(self.types),
            typed: self.typed,
            open: self.open,
        })
    }

    fn next_order(&mut self) -> usize {
        self.order += 1;
        self.order
    }

    fn components<E: Event>(&mut self) -> &mut Components {
        self.types.register::<E>();
        self.typed.entry(TypeId::of::<E>()).or_default()
    }

    fn with_handler<E: Event>(mut self, resolve: Resolve<dyn ErasedHandler>) -> Self {
        let order = self.next_order();
        let components = self.components::<E>();
        let duplicate = components.handler.is_some();
        if !duplicate {
            components.handler = Some(Entry { order, resolve });
        }
        if duplicate {
            self.duplicate_handlers.push(E::NAME);
        }
        self
    }

    fn with_typed<E: Event, T: ?Sized>(mut self, slot: Slot<T>, resolve: Resolve<T>) -> Self {
        let order = self.next_order();
        slot(self.components::<E>()).push(Entry { order, resolve });
        self
    }

    fn with_open<T: ?Sized>(mut self, slot: Slot<T>, resolve: Resolve<T>) -> Self {
        let order = self.next_order();
        slot(&mut self.open).push(Entry { order, resolve });
        self
    }
}

/// 不可变的事件注册表
pub struct EventRegistry {
    types: Arc<EventTypes>,
    typed: HashMap<TypeId, Components>,
    open: Components,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::new()
    }

    /// 解码所需的类型集合
    pub fn event_types(&self) -> Arc<EventTypes> {
        self.types.clone()
    }

    pub fn has_handler(&self, event: &dyn AnyEvent) -> bool {
        self.typed
            .get(&event.event_type_id())
            .is_some_and(|c| c.handler.is_some())
    }

    /// 为一条记录组装执行计划；事件类型没有处理器时返回 `None`
    pub fn execution_plan(&self, event: &dyn AnyEvent) -> Option<ExecutionPlan> {
        let components = self.typed.get(&event.event_type_id())?;
        let handler = components.handler.as_ref()?;

        let behaviors = merge(&components.behaviors, &self.open.behaviors);
        let pre = merge(&components.pre_processors, &self.open.pre_processors);
        let post = merge(&components.post_processors, &self.open.post_processors);
        Some(ExecutionPlan::new(
            behaviors,
            Terminal::new(pre, (handler.resolve)(), post),
        ))
    }

    pub(crate) fn pre_append_actions(
        &self,
        event: &dyn AnyEvent,
    ) -> Vec<Arc<dyn OpenPreAppendEventAction>> {
        let typed = self
            .typed
            .get(&event.event_type_id())
            .map(|c| c.pre_append.as_slice())
            .unwrap_or_default();
        merge(typed, &self.open.pre_append)
    }

    pub(crate) fn post_append_actions(
        &self,
        event: &dyn AnyEvent,
    ) -> Vec<Arc<dyn OpenPostAppendEventAction>> {
        let typed = self
            .typed
            .get(&event.event_type_id())
            .map(|c| c.post_append.as_slice())
            .unwrap_or_default();
        merge(typed, &self.open.post_append)
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self {
            types: Arc::new(EventTypes::new()),
            typed: HashMap::new(),
            open: Components::default(),
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.types.len())
            .field("typed", &self.typed.len())
            .finish_non_exhaustive()
    }
}

/// 按注册序号合并强类型与开放组件，并解析出实例
fn merge<T: ?Sized>(typed: &[Entry<T>], open: &[Entry<T>]) -> Vec<Arc<T>> {
    let mut entries: Vec<&Entry<T>> = typed.iter().chain(open).collect();
    entries.sort_by_key(|entry| entry.order);
    entries.into_iter().map(|entry| (entry.resolve)()).collect()
}
