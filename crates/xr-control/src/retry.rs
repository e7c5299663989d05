//! Caller-side retry with exponential backoff
//!
//! The reconciler makes exactly one attempt per operation. Callers that want
//! to ride out a flaky network wrap an operation in [`retry`], which repeats
//! it only while the failure is retryable.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use xr_core::config::BackoffConfig;
use xr_core::XrError;

/// Exponential backoff with jitter
pub struct ExponentialBackoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
            jitter,
        }
    }

    /// Get the next delay and advance the backoff
    ///
    /// Never exceeds `max` plus jitter. Out-of-range factors degrade to a
    /// capped delay instead of panicking.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        let next = (delay.as_secs_f64() * self.multiplier).min(self.max.as_secs_f64());
        self.current = Duration::try_from_secs_f64(next).unwrap_or(self.max);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let jitter_amount = delay.as_secs_f64() * jitter * rand::random::<f64>();
        delay.saturating_add(Duration::try_from_secs_f64(jitter_amount).unwrap_or_default())
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` attempts have been made
pub async fn retry<T, F, Fut>(config: &BackoffConfig, mut op: F) -> Result<T, XrError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, XrError>>,
{
    let mut backoff = ExponentialBackoff::from_config(config);
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = backoff.next_delay();
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
