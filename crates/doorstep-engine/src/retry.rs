//! Bounded retry of transient remote failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// How many times a remote call is attempted, and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first included. Zero is treated as one.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single attempt.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts run out. The last failure is returned.
///
/// Only failures for which [`EngineError::is_transient`](crate::EngineError::is_transient)
/// holds are retried.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
