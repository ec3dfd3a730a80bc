//! Bounded fixed-interval retry for polling external systems
//!
//! Every poll of the command mesh goes through [`retry`]. Attempts are always
//! bounded; what happens after exhaustion (hard failure or graceful empty
//! result) is decided by the caller.

use crate::error::{DarksiteError, DarksiteResult};
use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Jitter strategy for retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum JitterStrategy {
    None,
    /// delay * (min to max)
    ProportionalRange { min: f64, max: f64 },
}

/// Configuration for retry operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Pause after each failed attempt, before jitter
    pub delay: Duration,
    pub jitter: JitterStrategy,
    /// Function to determine if an error is retryable
    pub is_retryable: fn(&DarksiteError) -> bool,
    /// Name used in retry log lines
    pub operation_name: String,
}

impl RetryConfig {
    /// Fixed delay, no jitter, every error retried
    pub fn fixed(operation_name: &str, attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            delay,
            jitter: JitterStrategy::None,
            is_retryable: |_| true,
            operation_name: operation_name.to_string(),
        }
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable(mut self, is_retryable: fn(&DarksiteError) -> bool) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    /// Delay to wait after a failed attempt, jitter applied
    pub fn next_delay(&self) -> Duration {
        apply_jitter(self.delay, &self.jitter)
    }
}

fn apply_jitter(base_delay: Duration, strategy: &JitterStrategy) -> Duration {
    let mut rng = rand::thread_rng();
    match strategy {
        JitterStrategy::None => base_delay,
        JitterStrategy::ProportionalRange { min, max } => {
            let factor = rng.gen_range(*min..*max);
            Duration::from_millis((base_delay.as_millis() as f64 * factor) as u64)
        }
    }
}

/// Retry an async operation with the given configuration.
///
/// The closure receives the 1-based attempt number. The last error is
/// returned once attempts are exhausted or a non-retryable error is seen.
pub async fn retry<'a, F, T>(config: &RetryConfig, mut operation: F) -> DarksiteResult<T>
where
    F: FnMut(u32) -> BoxFuture<'a, DarksiteResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "{} succeeded after {} attempts",
                        config.operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    warn!(
                        "{}: max retry attempts ({}) reached",
                        config.operation_name, config.max_attempts
                    );
                    return Err(error);
                }
                if !(config.is_retryable)(&error) {
                    debug!("{}: error is not retryable: {}", config.operation_name, error);
                    return Err(error);
                }

                let delay = config.next_delay();
                debug!(
                    "{}: attempt {}/{} failed: {} (waiting {:?})",
                    config.operation_name, attempt, config.max_attempts, error, delay
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_successful_on_first_attempt() {
        let config = RetryConfig::fixed("test", 3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry(&config, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(attempt) }.boxed()
        })
        .await
        .unwrap();

        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let config = RetryConfig::fixed("test", 5, Duration::from_millis(1));

        let result = retry(&config, |attempt| {
            async move {
                if attempt < 3 {
                    Err(DarksiteError::TemporaryFailure {
                        details: "not yet".into(),
                    })
                } else {
                    Ok("done")
                }
            }
            .boxed()
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let config = RetryConfig::fixed("test", 4, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: DarksiteResult<()> = retry(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DarksiteError::TemporaryFailure { details: "down".into() }) }.boxed()
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let config = RetryConfig::fixed("test", 10, Duration::from_millis(1))
            .with_retryable(DarksiteError::is_transient);
        let calls = AtomicU32::new(0);

        let result: DarksiteResult<()> = retry(&config, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DarksiteError::ConfigError("bad".into())) }.boxed()
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::fixed("test", 3, Duration::from_millis(1000))
            .with_jitter(JitterStrategy::ProportionalRange { min: 0.5, max: 1.5 });
        for attempt in 1..50 {
            let delay = config.next_delay();
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1500));
        }
    }
}
