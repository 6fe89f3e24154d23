//! 聚合（Aggregate）抽象与回放
//!
//! - `AggregateCore`：标识、版本与未提交变更缓冲；
//! - `AggregateEvent`：聚合的事件和类型，连接强类型事件与类型擦除事件；
//! - `Entity`：由 `#[aggregate]` 宏生成，提供构造与核心状态访问；
//! - `Aggregate`：应用侧实现 `apply`，其余行为（产生变更、回放历史）由默认方法提供。
//!
//! 版本语义：新建聚合版本为 -1，每应用一条事件（无论新产生或回放）版本加一，
//! 因此版本即最后一条事件在流中的位置。
//!
use crate::error::{AggregateError, AggregateResult};
use ddd_eventstore::pipeline::EventRegistryBuilder;
use ddd_eventstore::{AnyEvent, ReadEnvelope, WriteEnvelope};
use std::fmt;

/// 聚合所处的生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    /// 尚无任何事件
    New,
    /// 存在未提交的变更
    Modified,
    /// 变更均已提交
    Committed,
}

/// 聚合的核心状态
#[derive(Clone)]
pub struct AggregateCore<E> {
    id: String,
    version: i64,
    changes: Vec<E>,
}

impl<E> AggregateCore<E> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: -1,
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 由创建事件确定标识的聚合可在 `apply` 中设置
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// 尚未写入存储的事件，按产生顺序排列
    pub fn uncommitted_changes(&self) -> &[E] {
        &self.changes
    }

    pub fn state(&self) -> AggregateState {
        if !self.changes.is_empty() {
            AggregateState::Modified
        } else if self.version < 0 {
            AggregateState::New
        } else {
            AggregateState::Committed
        }
    }

    pub(crate) fn record(&mut self, event: E) {
        self.version += 1;
        self.changes.push(event);
    }

    pub(crate) fn advance(&mut self) {
        self.version += 1;
    }

    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.changes.clear();
    }
}

impl<E> Default for AggregateCore<E> {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl<E: fmt::Debug> fmt::Debug for AggregateCore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateCore")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("changes", &self.changes)
            .finish()
    }
}

/// 聚合的事件和类型；通常由 `#[aggregate_event]` 生成
pub trait AggregateEvent: fmt::Debug + Clone + Send + Sync + 'static {
    /// 在注册表中登记全部成员事件类型
    fn register(builder: EventRegistryBuilder) -> EventRegistryBuilder;

    fn as_event(&self) -> &dyn AnyEvent;

    fn into_envelope(self) -> WriteEnvelope;

    /// 由类型擦除事件还原；不属于该和类型时返回 `None`
    fn from_event(event: &dyn AnyEvent) -> Option<Self>;
}

/// 具备标识、版本与变更缓冲的聚合实体；通常由 `#[aggregate]` 生成
pub trait Entity: fmt::Debug + Send + Sync + 'static {
    type Event: AggregateEvent;

    /// 用于推导流名的类型名
    const TYPE_NAME: &'static str;

    fn new(id: String) -> Self;

    fn core(&self) -> &AggregateCore<Self::Event>;

    fn core_mut(&mut self) -> &mut AggregateCore<Self::Event>;

    fn id(&self) -> &str {
        self.core().id()
    }

    fn version(&self) -> i64 {
        self.core().version()
    }

    fn uncommitted_changes(&self) -> &[Self::Event] {
        self.core().uncommitted_changes()
    }
}

/// 聚合根接口
pub trait Aggregate: Entity {
    /// 应用事件，更新可见状态；版本与变更缓冲由默认方法维护
    fn apply(&mut self, event: &Self::Event);

    /// 产生一条新变更：应用、版本加一并追加到未提交缓冲
    fn raise(&mut self, event: impl Into<Self::Event>) {
        let event = event.into();
        self.apply(&event);
        self.core_mut().record(event);
    }

    /// 按顺序回放历史，不进入未提交缓冲
    fn load_from_history(&mut self, history: &[ReadEnvelope]) -> AggregateResult<()> {
        for envelope in history {
            let event = Self::Event::from_event(envelope.event()).ok_or_else(|| {
                AggregateError::UnexpectedEvent {
                    aggregate: Self::TYPE_NAME,
                    event_type: envelope.event().event_type().name(),
                }
            })?;
            self.apply(&event);
            self.core_mut().advance();
        }
        Ok(())
    }
}

/// 为注册表构建器登记聚合的全部事件类型
pub trait AggregateRegistryExt {
    fn aggregate<A: Entity>(self) -> Self;
}

impl AggregateRegistryExt for EventRegistryBuilder {
    fn aggregate<A: Entity>(self) -> Self {
        A::Event::register(self)
    }
}
