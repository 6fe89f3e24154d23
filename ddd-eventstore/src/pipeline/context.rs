//! 消费上下文、请求作用域与处理结果
//!
use crate::event::Metadata;
use bon::Builder;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// 管道执行结果，决定对日志存储的确认动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// ack
    Ok,
    /// nack 并请求立即重投
    ImmediateRetry,
    /// 不做任何动作，由存储的超时机制负责重投
    RetryByAbandon,
    /// 停放，等待人工处理
    Park,
}

/// 单条记录的请求作用域资源集
///
/// 在执行计划开始时创建，由最外层帧在所有退出路径上恰好释放一次。
#[derive(Default)]
pub struct RequestScope {
    resources: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    released: AtomicBool,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入资源，返回同类型的旧值；作用域已释放时资源被立即丢弃
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        if self.is_released() {
            return None;
        }
        self.resources
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.resources
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// 以可变引用访问资源
    pub fn with<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut resources = self.resources.lock();
        resources
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
            .map(f)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let resources = std::mem::take(&mut *self.resources.lock());
        tracing::trace!(resources = resources.len(), "request scope released");
        drop(resources);
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// 消费上下文：随记录传入处理链
#[derive(Builder, Clone, Debug)]
pub struct ConsumerContext {
    /// 事件所在的流
    #[builder(into)]
    stream_name: String,
    /// 存储上报的重试次数
    retry_count: Option<u32>,
    /// 调用方元数据
    metadata: Option<Metadata>,
    #[builder(default)]
    scope: Arc<RequestScope>,
    #[builder(default)]
    cancellation: CancellationToken,
}

impl ConsumerContext {
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn retry_count(&self) -> Option<u32> {
        self.retry_count
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn scope_holds_resources_until_released_once() {
        let scope = RequestScope::new();
        assert_eq!(scope.insert(Tenant("acme")), None);
        assert_eq!(scope.insert(Tenant("globex")), Some(Tenant("acme")));
        assert_eq!(scope.get::<Tenant>(), Some(Tenant("globex")));
        assert_eq!(scope.with(|counter: &mut u32| *counter), None);

        scope.insert(0u32);
        scope.with(|counter: &mut u32| *counter += 2);
        assert_eq!(scope.get::<u32>(), Some(2));

        scope.release();
        scope.release();
        assert!(scope.is_released());
        assert_eq!(scope.get::<Tenant>(), None);
        assert_eq!(scope.insert(Tenant("late")), None);
        assert_eq!(scope.get::<Tenant>(), None);
    }
}
