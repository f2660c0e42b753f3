//! Retry logic with exponential backoff
//!
//! Wraps a single outbound call. Connection-level failures and the statuses
//! in [`RETRYABLE_STATUSES`] are retried; everything else fails immediately.

use crate::Result;
use crate::config::RetrySettings;
use crate::error::ToolClientError;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// HTTP statuses worth another attempt
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt
    pub max_retries: u32,

    /// Backoff before the first retry
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential backoff)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.base_delay_ms),
            max_backoff: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_secs(0),
            max_backoff: Duration::from_secs(0),
            backoff_multiplier: 1.0,
        }
    }

    /// Create a policy with fast retries (for testing)
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate backoff duration before retry number `retry` (1-based)
    fn backoff_duration(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::from_secs(0);
        }

        let backoff_ms = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi((retry - 1) as i32);

        let backoff = Duration::from_millis(backoff_ms as u64);

        // Cap at max backoff
        if backoff > self.max_backoff {
            self.max_backoff
        } else {
            backoff
        }
    }

    /// Delay before the next retry; a server hint wins over the computed
    /// backoff but is still capped
    fn delay_for(&self, retry: u32, error: &ToolClientError) -> Duration {
        match error {
            ToolClientError::Transport {
                retry_after: Some(hint),
                ..
            } => (*hint).min(self.max_backoff),
            _ => self.backoff_duration(retry),
        }
    }

    /// Check if an error is retryable
    pub fn is_retryable(error: &ToolClientError) -> bool {
        match error {
            ToolClientError::Transport { status: None, .. } | ToolClientError::Timeout(_) => true,
            ToolClientError::Transport {
                status: Some(status),
                ..
            } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// Execute an async operation with retry logic
    ///
    /// # Arguments
    ///
    /// * `operation_name` - Name of the operation (for logging)
    /// * `operation` - Async operation to execute
    ///
    /// # Returns
    ///
    /// Result of the operation, or the last error if all attempts fail
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(
                "Attempt {}/{} for operation: {}",
                attempt, max_attempts, operation_name
            );

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            "Operation '{}' succeeded after {} retries",
                            operation_name,
                            attempt - 1
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !Self::is_retryable(&error) {
                debug!(
                    "Operation '{}' failed with non-retryable error: {}",
                    operation_name, error
                );
                return Err(error);
            }

            if attempt >= max_attempts {
                warn!(
                    "Operation '{}' failed after {} attempts: {}",
                    operation_name, attempt, error
                );
                return Err(error);
            }

            let backoff = self.delay_for(attempt, &error);
            warn!(
                "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                operation_name, attempt, max_attempts, error, backoff
            );
            sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.initial_backoff, Duration::from_millis(200));
        assert_eq!(policy.max_backoff, Duration::from_secs(5));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_duration(0), Duration::from_secs(0));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_duration(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);

        // Should be capped at 5 seconds
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_hint_is_capped() {
        let policy = RetryPolicy::default();
        let hinted = ToolClientError::Transport {
            message: "slow down".to_string(),
            status: Some(429),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(1, &hinted), Duration::from_secs(2));

        let greedy = ToolClientError::Transport {
            message: "slow down".to_string(),
            status: Some(429),
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(policy.delay_for(1, &greedy), Duration::from_secs(5));
    }

    #[test]
    fn test_is_retryable() {
        assert!(RetryPolicy::is_retryable(&ToolClientError::connection(
            "refused"
        )));
        assert!(RetryPolicy::is_retryable(&ToolClientError::status(502, "")));
        assert!(RetryPolicy::is_retryable(&ToolClientError::status(503, "")));
        assert!(RetryPolicy::is_retryable(&ToolClientError::status(429, "")));
        assert!(RetryPolicy::is_retryable(&ToolClientError::Timeout(
            Duration::from_secs(1)
        )));

        assert!(!RetryPolicy::is_retryable(&ToolClientError::status(400, "")));
        assert!(!RetryPolicy::is_retryable(&ToolClientError::status(404, "")));
        assert!(!RetryPolicy::is_retryable(&ToolClientError::Protocol(
            "bad".to_string()
        )));
        assert!(!RetryPolicy::is_retryable(&ToolClientError::Config(
            "test".to_string()
        )));
    }

    async fn run_with_statuses(statuses: Vec<Option<u16>>) -> (Result<&'static str>, u32) {
        let policy = RetryPolicy::fast();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = policy
            .execute("test_op", || {
                let counter = counter.clone();
                let statuses = statuses.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) as usize;
                    // Past the scripted list the last entry repeats
                    let status = statuses.get(n).or(statuses.last()).copied().flatten();
                    match status {
                        Some(200) => Ok("ok"),
                        Some(code) => Err(ToolClientError::status(code, "scripted")),
                        None => Err(ToolClientError::connection("refused")),
                    }
                }
            })
            .await;

        (result, attempts.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_502_then_200_takes_two_attempts() {
        let (result, attempts) = run_with_statuses(vec![Some(502), Some(200)]).await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_400_fails_after_one_attempt() {
        let (result, attempts) = run_with_statuses(vec![Some(400)]).await;

        assert!(matches!(
            result,
            Err(ToolClientError::Transport {
                status: Some(400),
                ..
            })
        ));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_retries() {
        let (result, attempts) = run_with_statuses(vec![None]).await;

        assert!(result.is_err());
        assert_eq!(attempts, 1 + RetryPolicy::fast().max_retries);
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let (result, attempts) = run_with_statuses(vec![Some(200)]).await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts, 1);
    }
}
