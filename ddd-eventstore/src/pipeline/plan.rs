//! 执行计划（ExecutionPlan）
//!
//! 一条记录的处理链由外向内依次为：
//! 作用域释放帧 → 管道行为（按注册顺序）→ 前置处理器 → 处理器 → 后置处理器。
//!
//! 计划在每条记录到达时由注册表按事件类型组装；作用域型组件在此时构建，
//! 请求作用域在计划创建时生成，并由最外层帧在任何退出路径上释放。
//!
use super::context::{ConsumerContext, OperationResult, RequestScope};
use super::contracts::{ErasedHandler, OpenPipelineBehavior, OpenPostProcessor, OpenPreProcessor};
use crate::event::AnyEvent;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// 处理链末端：前置处理器、处理器、后置处理器
pub(crate) struct Terminal {
    pre: Vec<Arc<dyn OpenPreProcessor>>,
    handler: Arc<dyn ErasedHandler>,
    post: Vec<Arc<dyn OpenPostProcessor>>,
}

impl Terminal {
    pub(crate) fn new(
        pre: Vec<Arc<dyn OpenPreProcessor>>,
        handler: Arc<dyn ErasedHandler>,
        post: Vec<Arc<dyn OpenPostProcessor>>,
    ) -> Self {
        Self { pre, handler, post }
    }

    async fn execute(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
    ) -> anyhow::Result<OperationResult> {
        for processor in &self.pre {
            processor.execute(event, ctx).await?;
        }
        let mut result = self.handler.handle(event, ctx).await?;
        for processor in &self.post {
            result = processor.execute(event, ctx, result).await?;
        }
        Ok(result)
    }
}

/// 处理链中“其余部分”的续体
///
/// 行为通过 `next.run()` 调用内层；不调用即为短路，多次调用即为重试。
#[derive(Clone, Copy)]
pub struct Next<'a> {
    frames: &'a [Arc<dyn OpenPipelineBehavior>],
    terminal: &'a Terminal,
    event: &'a dyn AnyEvent,
    ctx: &'a ConsumerContext,
}

impl<'a> Next<'a> {
    pub async fn run(self) -> anyhow::Result<OperationResult> {
        match self.frames.split_first() {
            Some((frame, rest)) => {
                let next = Next {
                    frames: rest,
                    ..self
                };
                frame.execute(self.event, self.ctx, next).await
            }
            None => self.terminal.execute(self.event, self.ctx).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining_frames", &self.frames.len())
            .field("event", &self.event.event_type().name())
            .finish()
    }
}

struct ScopeRelease {
    scope: Arc<RequestScope>,
}

struct ReleaseGuard<'a>(&'a RequestScope);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[async_trait]
impl OpenPipelineBehavior for ScopeRelease {
    async fn execute(
        &self,
        _event: &dyn AnyEvent,
        _ctx: &ConsumerContext,
        next: Next<'_>,
    ) -> anyhow::Result<OperationResult> {
        let _release = ReleaseGuard(&self.scope);
        next.run().await
    }
}

/// 针对单条记录组装好的处理链
pub struct ExecutionPlan {
    frames: Vec<Arc<dyn OpenPipelineBehavior>>,
    terminal: Terminal,
    scope: Arc<RequestScope>,
}

impl ExecutionPlan {
    pub(crate) fn new(behaviors: Vec<Arc<dyn OpenPipelineBehavior>>, terminal: Terminal) -> Self {
        let scope = Arc::new(RequestScope::new());
        let mut frames: Vec<Arc<dyn OpenPipelineBehavior>> =
            Vec::with_capacity(behaviors.len() + 1);
        frames.push(Arc::new(ScopeRelease {
            scope: scope.clone(),
        }));
        frames.extend(behaviors);

        Self {
            frames,
            terminal,
            scope,
        }
    }

    /// 本次执行的请求作用域；应作为 `ConsumerContext` 的作用域传入
    pub fn scope(&self) -> Arc<RequestScope> {
        self.scope.clone()
    }

    /// 处理链中的行为数量（含作用域释放帧）
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub async fn execute(
        &self,
        event: &dyn AnyEvent,
        ctx: &ConsumerContext,
    ) -> anyhow::Result<OperationResult> {
        Next {
            frames: &self.frames,
            terminal: &self.terminal,
            event,
            ctx,
        }
        .run()
        .await
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("frames", &self.frames.len())
            .field("pre_processors", &self.terminal.pre.len())
            .field("post_processors", &self.terminal.post.len())
            .field("scope", &self.scope)
            .finish()
    }
}
