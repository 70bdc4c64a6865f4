//! Retry policy with linear backoff and bounded-time execution
//!
//! Every remote call goes through [`RetryExecutor`]: transient failures
//! (transport errors and 5xx responses) are retried with a delay of
//! `attempt × base_delay`, everything else fails immediately.

use crate::error::{HassError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay; attempt `n` is followed by a pause of `n × base_delay`
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Enable detailed logging
    pub detailed_logging: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            detailed_logging: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Default::default()
        }
    }

    /// Calculate the pause after a failed attempt (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Check if error should be retried
    pub fn should_retry(&self, error: &HassError) -> bool {
        error.is_retryable()
    }
}

/// Result of a bounded-time remote call.
///
/// A timeout is an expected outcome for device commands, not an error, so it
/// is reported as a value the caller has to look at.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Completed(T),
    TimedOut,
}

impl<T> CallOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, CallOutcome::TimedOut)
    }
}

/// Retry executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    stats: Arc<RwLock<RetryStats>>,
}

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Failed operations (all retries exhausted or not retryable)
    pub failed_operations: u64,
    /// Operations abandoned because their time bound elapsed
    pub timed_out_operations: u64,
    /// Total retry attempts
    pub total_retry_attempts: u64,
    /// Last retry timestamp
    pub last_retry: Option<DateTime<Utc>>,
}

impl RetryExecutor {
    /// Create new retry executor
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute operation with retry policy
    pub async fn execute<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let mut attempt = 0;

        loop {
            attempt += 1;

            if self.policy.detailed_logging && attempt > 1 {
                debug!("Retry attempt {} of {}", attempt, self.policy.max_attempts);
            }

            let error = match operation().await {
                Ok(result) => {
                    let mut stats = self.stats.write().await;
                    if attempt == 1 {
                        stats.successful_first_attempt += 1;
                    } else {
                        stats.successful_after_retry += 1;
                    }
                    drop(stats);

                    if self.policy.detailed_logging && attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }

                    return Ok(result);
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&error) {
                self.stats.write().await.failed_operations += 1;
                if self.policy.detailed_logging {
                    debug!("Error not retryable: {}", error);
                }
                return Err(error);
            }

            if attempt >= self.policy.max_attempts {
                self.stats.write().await.failed_operations += 1;
                warn!("Operation failed after {} attempts: {}", attempt, error);
                return Err(error);
            }

            let delay = self.policy.calculate_delay(attempt);

            let mut stats = self.stats.write().await;
            stats.total_retry_attempts += 1;
            stats.last_retry = Some(Utc::now());
            drop(stats);

            debug!(
                "Retrying after {:?} (attempt {}/{}): {}",
                delay, attempt, self.policy.max_attempts, error
            );

            sleep(delay).await;
        }
    }

    /// Execute with retries inside an overall time bound.
    ///
    /// The bound covers all attempts and backoff pauses. When it elapses the
    /// in-flight attempt is dropped and [`CallOutcome::TimedOut`] is returned.
    pub async fn execute_with_timeout<F, T, Fut>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> Result<CallOutcome<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, self.execute(operation)).await {
            Ok(result) => result.map(CallOutcome::Completed),
            Err(_) => {
                self.stats.write().await.timed_out_operations += 1;
                warn!("Operation exceeded its {:?} time bound", timeout);
                Ok(CallOutcome::TimedOut)
            }
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op(
        counter: Arc<AtomicU32>,
        fail_until: u32,
        error: fn() -> HassError,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<&'static str>> + Send>> {
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if current < fail_until {
                    Err(error())
                } else {
                    Ok("done")
                }
            })
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(100)));

        let started = tokio::time::Instant::now();
        let result = executor
            .execute(counting_op(attempts.clone(), 3, || {
                HassError::service_unavailable("502")
            }))
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 100ms after the first failure, 200ms after the second
        assert_eq!(started.elapsed(), Duration::from_millis(300));

        let stats = executor.get_stats().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.successful_after_retry, 1);
        assert_eq!(stats.total_retry_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new(3, Duration::from_millis(100)));

        let result = executor
            .execute(counting_op(attempts.clone(), 10, || {
                HassError::connection("refused")
            }))
            .await;

        assert!(matches!(result, Err(HassError::Connection(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(executor.get_stats().await.failed_operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::default());

        let result = executor
            .execute(counting_op(attempts.clone(), 10, || {
                HassError::invalid_input("400 bad request")
            }))
            .await;

        assert!(matches!(result, Err(HassError::InvalidInput(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_timed_out_outcome() {
        let executor = RetryExecutor::new(RetryPolicy::default());

        let outcome = executor
            .execute_with_timeout(Duration::from_secs(1), || async {
                sleep(Duration::from_secs(10)).await;
                Ok::<_, HassError>(())
            })
            .await
            .unwrap();

        assert!(outcome.is_timed_out());
        assert_eq!(executor.get_stats().await.timed_out_operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_passes_completed_value() {
        let executor = RetryExecutor::new(RetryPolicy::default());

        let outcome = executor
            .execute_with_timeout(Duration::from_secs(1), || async { Ok(42) })
            .await
            .unwrap();

        assert_eq!(outcome, CallOutcome::Completed(42));
    }
}
