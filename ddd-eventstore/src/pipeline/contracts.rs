//! 处理链协议
//!
//! 每类组件都有强类型（按事件类型注册）与开放（对所有事件类型生效）两种形式；
//! 强类型组件在注册时被包装为开放形式，两者按注册顺序交错执行。
//!
use super::context::{ConsumerContext, OperationResult};
use super::plan::Next;
use crate::event::{AnyEvent, Event, Metadata};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// 事件处理器：每个事件类型至多注册一个
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: &E, ctx: &ConsumerContext) -> anyhow::Result<OperationResult>;
}

/// 管道行为：包裹后续处理链，可短路、重试或改写结果
#[async_trait]
pub trait PipelineBehavior<E: Event>: Send + Sync {
    async fn execute(
        &self,
        event: &E,
        ctx: &ConsumerContext,
        next: Next<'_>,
    ) -> anyhow::Result<OperationResult>;
}

#[async_trait]
pub trait OpenPipelineBehavior: Send + Sync {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
        next: Next<'_>,
    ) -> anyhow::Result<OperationResult>;
}

/// 在处理器之前执行
#[async_trait]
pub trait PreProcessor<E: Event>: Send + Sync {
    async fn execute(&self, event: &E, ctx: &ConsumerContext) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OpenPreProcessor: Send + Sync {
    async fn execute(&self, event: &dyn AnyEvent, ctx: &ConsumerContext) -> anyhow::Result<()>;
}

/// 在处理器之后执行，可替换当前结果
#[async_trait]
pub trait PostProcessor<E: Event>: Send + Sync {
    async fn execute(
        &self,
        event: &E,
        ctx: &ConsumerContext,
        result: OperationResult,
    ) -> anyhow::Result<OperationResult>;
}

#[async_trait]
pub trait OpenPostProcessor: Send + Sync {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
        result: OperationResult,
    ) -> anyhow::Result<OperationResult>;
}

/// 追加前动作：在序列化前执行，可修改信封元数据
#[async_trait]
pub trait PreAppendEventAction<E: Event>: Send + Sync {
    async fn execute(
        &self,
        event: &E,
        metadata: &mut Option<Metadata>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OpenPreAppendEventAction: Send + Sync {
    async fn execute(
        &self,
        event: &dyn AnyEvent,
        metadata: &mut Option<Metadata>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// 追加成功后执行
#[async_trait]
pub trait PostAppendEventAction<E: Event>: Send + Sync {
    async fn execute(&self, event: &E, cancel: &CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
pub trait OpenPostAppendEventAction: Send + Sync {
    async fn execute(&self, event: &dyn AnyEvent, cancel: &CancellationToken)
    -> anyhow::Result<()>;
}

/// 类型擦除的处理器
#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn handle(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
    ) -> anyhow::Result<OperationResult>;
}
