//! 有界重试策略
//!
//! 指数退避：`min(max_backoff, initial_backoff * 2^attempt)`，
//! 尝试次数有上限，永不无限重试。

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// 重试策略配置
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 首次退避时间（毫秒）
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// 最大退避时间（毫秒）
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// 第 `attempt` 次失败后的等待时间（attempt 从 0 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(31));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }

    /// 在预算内重试异步操作，返回最后一次的错误
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(operation, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt + 1 >= max_attempts => {
                    tracing::error!(
                        operation,
                        attempts = max_attempts,
                        error = %e,
                        "Retry budget exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
