//! Retry with exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Policy for retrying a fallible async operation with exponential backoff.
///
/// Delays grow as `initial_delay * backoff_base^attempt`, capped at
/// `max_delay`. The operation is attempted at most `max_attempts` times;
/// the final error is returned unchanged once attempts are exhausted.
///
/// # Example
///
/// ```no_run
/// use testbed::retry::RetryPolicy;
///
/// # async fn doc() -> Result<(), std::io::Error> {
/// let policy = RetryPolicy::new(5).with_initial_delay(std::time::Duration::from_millis(200));
/// let data = policy
///     .run("fetch tunnel url", || async { fetch_url().await })
///     .await?;
/// # Ok(())
/// # }
/// # async fn fetch_url() -> Result<String, std::io::Error> { Ok(String::new()) }
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt bound and default backoff.
    ///
    /// `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the upper bound on any single backoff delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the exponential growth factor between attempts.
    pub fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    /// Returns the maximum number of attempts.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Returns the backoff delay after the given 0-indexed attempt.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = self.backoff_base.powi(attempt as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds or attempts are exhausted.
    ///
    /// Sleeps the backoff delay between attempts. `label` identifies the
    /// operation in log output.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt + 1 >= self.max_attempts {
                        warn!(
                            "{} failed after {} attempts: {}",
                            label, self.max_attempts, err
                        );
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(5)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60));

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3).with_initial_delay(Duration::from_millis(10));

        let result: Result<usize, String> = policy
            .run("flaky op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("transient {}", n))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(2).with_initial_delay(Duration::from_millis(10));

        let result: Result<(), String> = policy
            .run("always fails", || async { Err("boom".to_string()) })
            .await;

        assert_eq!(result.unwrap_err(), "boom");
    }
}
