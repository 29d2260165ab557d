use crate::config::RetryConfig;
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use backoff::SystemClock;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential-backoff retry for a single network operation.
///
/// Errors classified retryable by [`Error::is_retryable`] are retried up to
/// `max_attempts`; everything else surfaces on the first failure. Exhaustion
/// converts the last transient error into [`Error::RetriesExhausted`], which
/// is fatal to the caller. The wrapped operation must be idempotent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter_ratio,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter_ratio,
        )
    }

    fn build_backoff(&self) -> ExponentialBackoff<SystemClock> {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: self.jitter_ratio,
            multiplier: 2.0,
            max_interval: self.max_delay,
            // Attempt count is the budget, not elapsed time.
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.build_backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match operation().await {
                Ok(result) => {
                    if attempts > 1 {
                        debug!(
                            operation = operation_name,
                            attempts,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempts >= self.max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts,
                            error = %e,
                            "Operation failed after max attempts"
                        );
                        return Err(Error::RetriesExhausted {
                            operation: operation_name.to_string(),
                            attempts,
                            last: Box::new(e),
                        });
                    }

                    let delay =
                        next_delay(backoff.next_backoff(), e.retry_after_hint(), self.max_delay);
                    warn!(
                        operation = operation_name,
                        attempt = attempts,
                        retry_after_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Sleep before the next attempt. The computed exponential value is capped at
/// `max_delay`; a 429 Retry-After hint is a floor and may exceed the cap.
pub(crate) fn next_delay(
    computed: Option<Duration>,
    hint: Option<Duration>,
    max_delay: Duration,
) -> Duration {
    let mut delay = computed.unwrap_or(max_delay).min(max_delay);
    if let Some(hint) = hint {
        delay = delay.max(hint);
    }
    delay
}
