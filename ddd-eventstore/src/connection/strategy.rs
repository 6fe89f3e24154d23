//! 重连策略（ConnectionStrategy）
//!
//! 策略只决定“第 n 次失败后是否重试、等待多久”；执行循环由 `execute` 统一驱动，
//! 每次调用独立计数，成功即视为计数归零。
//!
use crate::error::{EventStoreError, EventStoreResult};
use bon::Builder;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 可插拔的重连策略
pub trait ConnectionStrategy: Send + Sync {
    /// 第 `attempt` 次（从 1 开始）失败后，返回重试前的等待时长；`None` 表示放弃
    fn retry_after(&self, attempt: u32, error: &EventStoreError) -> Option<Duration>;
}

/// 单次执行，不重试；适用于自行管理重连的调用方
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetryStrategy;

impl ConnectionStrategy for NoRetryStrategy {
    fn retry_after(&self, _attempt: u32, _error: &EventStoreError) -> Option<Duration> {
        None
    }
}

/// 固定间隔、固定次数的重试；仅对 `ConnectionFailed` 生效
#[derive(Builder, Clone, Copy, Debug)]
pub struct FixedRetryStrategy {
    /// 总尝试次数（含首次）
    #[builder(default = 4)]
    max_attempts: u32,
    #[builder(default = Duration::from_secs(1))]
    delay: Duration,
}

impl Default for FixedRetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            delay: Duration::from_secs(1),
        }
    }
}

impl ConnectionStrategy for FixedRetryStrategy {
    fn retry_after(&self, attempt: u32, error: &EventStoreError) -> Option<Duration> {
        (error.is_transient() && attempt < self.max_attempts).then_some(self.delay)
    }
}

/// 按策略执行一次远程调用
///
/// 等待重试期间若被取消，返回最后一次的底层错误而非取消错误。
pub async fn execute<T, F, Fut>(
    strategy: &dyn ConnectionStrategy,
    cancel: &CancellationToken,
    mut op: F,
) -> EventStoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EventStoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        attempt += 1;
        let Some(delay) = strategy.retry_after(attempt, &error) else {
            return Err(error);
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(error),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
