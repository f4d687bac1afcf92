use std::time::Duration;
use tracing::{error, warn};

/// Upper bound for a single backoff sleep
const MAX_BACKOFF_MS: u64 = 60_000;

/// Retry settings for upstream fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay before the first retry (ms)
    pub retry_delay: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(retry_delay: u64, max_retries: u32) -> Self {
        Self {
            retry_delay,
            max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1000, 3)
    }
}

pub async fn with_retry<F, Fut, T, E>(
    operation: F,
    policy: RetryPolicy,
    operation_name: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt > policy.max_retries {
                    error!(
                        "Operation '{}' failed after {} attempts: {}",
                        operation_name, attempt, err
                    );
                    return Err(err);
                }

                let backoff = exponential_backoff(policy.retry_delay, attempt);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {}ms",
                    operation_name,
                    attempt,
                    policy.max_retries + 1,
                    err,
                    backoff
                );

                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
    }
}

/// Calculate exponential backoff with jitter
fn exponential_backoff(base_delay: u64, attempt: u32) -> u64 {
    let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
    let max_delay = base_delay.saturating_mul(factor).min(MAX_BACKOFF_MS);

    // ±20%
    let jitter = (rand::random::<f64>() * 0.4 - 0.2) * max_delay as f64;
    (max_delay as f64 + jitter) as u64
}
