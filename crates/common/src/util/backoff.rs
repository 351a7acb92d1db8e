//! 指数退避
//!
//! 认证刷新、目录服务重试以及信令重连共用同一套退避策略

use rand::Rng;
use std::time::Duration;

/// 指数退避计算器
///
/// 每次调用 [`Backoff::next_delay`] 将延迟翻倍直到 `max`，并叠加最多 10% 的随机抖动。
/// 计数通过 [`Backoff::reset`] 归零（例如连接成功之后）。
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
            jitter: true,
        }
    }

    /// 关闭随机抖动（测试中需要确定的延迟）
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// 已经消耗的尝试次数
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// 计算下一次重试前的等待时间
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(20)).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);

        let base = self.initial.saturating_mul(factor).min(self.max);
        if !self.jitter || base.is_zero() {
            return base;
        }

        let spread = base.as_millis() as u64 / 10;
        if spread == 0 {
            return base;
        }
        let extra = rand::rng().random_range(0..=spread);
        (base + Duration::from_millis(extra)).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_max() {
        let mut backoff =
            Backoff::new(Duration::from_millis(100), Duration::from_millis(1000)).without_jitter();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff =
            Backoff::new(Duration::from_millis(50), Duration::from_secs(5)).without_jitter();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_jitter_stays_within_max() {
        let mut backoff = Backoff::new(Duration::from_millis(400), Duration::from_millis(500));
        for _ in 0..50 {
            assert!(backoff.next_delay() <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_large_attempt_count_does_not_overflow() {
        let mut backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(30)).without_jitter();
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
