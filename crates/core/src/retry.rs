//! 重试策略与时钟抽象
//!
//! 确认通道的有界重试和会话重连退避共用同一个 [`RetryPolicy`]，
//! 等待通过 [`Clock`] 完成，测试中可替换为 [`ManualClock`] 而无需真实等待。

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// 可注入的时钟
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// 基于系统时间和 tokio 定时器的时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 手动推进的时钟，sleep 只推进虚拟时间并记录等待时长
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    /// 已记录的全部 sleep 时长
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次），None 表示不限次数
    pub max_attempts: Option<u32>,
    /// 基础重试间隔
    pub interval: Duration,
    /// 退避倍数，1.0 表示固定间隔
    pub backoff_multiplier: f64,
    /// 最大重试间隔
    pub max_interval: Duration,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

/// 重试次数耗尽
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// 固定间隔、固定次数
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            interval,
            backoff_multiplier: 1.0,
            max_interval: interval,
            jitter_factor: 0.0,
        }
    }

    /// 指数退避，不限次数
    pub fn exponential(base: Duration, max_interval: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: None,
            interval: base,
            backoff_multiplier: multiplier.max(1.0),
            max_interval: max_interval.max(base),
            jitter_factor: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts.map(|n| n.max(1));
        self
    }

    /// 第 attempt 次尝试（从1开始）之后是否还允许再尝试
    pub fn allows_another(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// 第 attempt 次失败后的等待时长
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter_factor > 0.0 {
            let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// 按策略执行操作，直到成功或次数耗尽
    pub async fn retry<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        operation: &str,
        mut op: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} 在第 {} 次尝试后成功", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if !self.allows_another(attempt) {
                        warn!("{} 重试 {} 次后仍然失败: {}", operation, attempt, e);
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} 第 {} 次尝试失败: {}，{:?} 后重试",
                        operation, attempt, e, delay
                    );
                    clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 确认通道默认策略：30秒 × 10次
    fn default() -> Self {
        Self::fixed(Duration::from_secs(30), 10)
    }
}
