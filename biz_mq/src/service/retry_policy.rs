use common::config::{RetryConfig, RetryMode};
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 循环失败后的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// 立即重试，无退避、无次数上限
    #[default]
    Immediate,
    /// 指数退避 + 全抖动，`attempt` 从 1 开始
    Backoff { initial: Duration, max: Duration },
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        match cfg.mode {
            RetryMode::Immediate => RetryPolicy::Immediate,
            RetryMode::Backoff => {
                let initial = Duration::from_millis(cfg.initial_backoff_ms.max(1));
                RetryPolicy::Backoff {
                    initial,
                    max: Duration::from_millis(cfg.max_backoff_ms).max(initial),
                }
            }
        }
    }

    /// 第 `attempt` 次连续失败后的等待上限
    pub fn ceiling(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Immediate => Duration::ZERO,
            RetryPolicy::Backoff { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    /// 在 `[0, ceiling]` 内随机取等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling))
    }

    /// 等待后返回 `true`；等待期间收到取消返回 `false`
    pub async fn pause(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay(attempt);
        if delay.is_zero() {
            // 不退避，但让出调度，避免独占运行时线程
            tokio::task::yield_now().await;
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
