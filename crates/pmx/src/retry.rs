//! 🔄 The Retry Executor: "have you tried turning it off and on again", but with math.
//!
//! Wraps a fallible store call, retries transient failures with exponential backoff, and
//! gives up after a bounded number of attempts. Terminal errors (bad credentials,
//! malformed requests) are surfaced on the first attempt: hammering a 401 five times
//! doesn't make the password more correct.
//!
//! ⚠️ The backoff sleep is the only suspension point inside the loop, and nothing here
//! holds a lock across it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::StoreError;

/// 📐 How hard to try before giving up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Never less than 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Each further delay is the previous one times this.
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// ⏱️ Delay to wait after `failed_attempt` (1-based) before trying again.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

/// 💀 Why the retry executor stopped trying.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{operation} failed permanently after {attempts} attempt(s): {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: StoreError,
    },
    #[error("{operation} failed with a non-retryable error: {source}")]
    Terminal {
        operation: String,
        #[source]
        source: StoreError,
    },
}

impl RetryError {
    /// The underlying store error from the final attempt.
    pub fn last_error(&self) -> &StoreError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Terminal { source, .. } => source,
        }
    }
}

/// 🔁 Run `operation` until it succeeds, fails terminally, or the attempt budget runs out.
///
/// The closure receives the 1-based attempt number, mostly so logs and tests can tell
/// attempts apart.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "✅ succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                warn!(operation = operation_name, attempt, error = %err, "🛑 non-retryable store error");
                return Err(RetryError::Terminal {
                    operation: operation_name.to_string(),
                    source: err,
                });
            }
            Err(err) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %err,
                    "💀 retry budget exhausted"
                );
                return Err(RetryError::Exhausted {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                let mut delay = policy.delay_after(attempt);
                // 🐢 the store told us how long to back off; believe it, within reason
                if let StoreError::Throttled {
                    retry_after: Some(hint),
                    ..
                } = &err
                {
                    delay = delay.max(*hint).min(policy.max_delay);
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "🔄 transient store error, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
