use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for `attempt` (0-based) with +/-25% jitter.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(2_u64.saturating_pow(attempt as u32))
            .min(max_ms);
        let jitter_range = (delay_ms as f64 * 0.25) as u64;
        let jitter = fastrand::u64(0..=jitter_range * 2);
        Duration::from_millis(delay_ms.saturating_sub(jitter_range).saturating_add(jitter))
    }
}

/// Retry loop with exponential backoff for local operations such as file
/// writes. Waits on the tokio timer, never the thread.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    context: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    log::debug!(
                        "Attempt {}/{} for {} failed: {:#}. Retrying in {}ms",
                        attempt + 1,
                        policy.max_retries + 1,
                        context,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("{} exhausted retry attempts", context)))
}

/// Async retry for network calls; `$operation` is re-evaluated per attempt.
macro_rules! retry_request {
    ($context:expr, $attempts:expr, $delay:expr, $operation:expr) => {{
        let max_attempts: u32 = $attempts;
        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= max_attempts => break Err(err),
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {:#}. Retrying in {}ms.",
                        attempt,
                        max_attempts,
                        context_value,
                        err,
                        $delay.as_millis()
                    );
                    tokio::time::sleep($delay).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_request;
