//! Exponential backoff shared by synthesis and graph writes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::Result;

/// Delay schedule: `initial * multiplier^(attempt - 1)`, capped, plus up to
/// 10% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    multiplier: f64,
    max_ms: u64,
    max_retries: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_ms: config.initial_backoff_ms,
            multiplier: config.multiplier,
            max_ms: config.max_backoff_ms,
            max_retries: config.max_retries,
        }
    }

    /// Total attempts allowed. `max_retries` counts every call, the first
    /// included, so `max_retries = 3` means three calls at most.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = (self.initial_ms as f64 * self.multiplier.powi(exp)).min(self.max_ms as f64);
        Duration::from_millis(ms as u64)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = (base.as_millis() as u64) / 10;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

/// Bound one external call; expiry becomes `Error::Timeout`.
pub async fn with_timeout<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(out) => out,
        Err(_) => Err(crate::Error::Timeout { operation: operation.to_string(), secs: limit.as_secs() }),
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget runs out. Returns the last error and the attempt count.
pub async fn retry<T, F, Fut>(backoff: &Backoff, what: &str, mut op: F) -> std::result::Result<T, (crate::Error, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_fatal() || !e.is_transient() || attempt >= backoff.max_attempts() => {
                return Err((e, attempt));
            }
            Err(e) => {
                let wait = backoff.delay(attempt);
                tracing::warn!(what, attempt, wait_ms = wait.as_millis() as u64, error = %e, "retrying after backoff");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
