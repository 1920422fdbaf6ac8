//! Jittered exponential backoff for transient platform calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay for a zero-based retry attempt: uniform in
    /// `[0, min(max, base * 2^attempt)]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay_ms);
        let ms = if cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=cap)
        };
        Duration::from_millis(ms)
    }
}

/// Retry `op` while it fails with an error `is_transient` accepts.
///
/// Non-transient errors return immediately. When retries are exhausted the
/// last error is returned.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && is_transient(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
