//! Exponential backoff around calls to external services.
//!
//! Both the OCR call and every summarization call go through [`retry_with_backoff`]; only the
//! wait bounds differ between them. The wrapper never inspects the error: any failure is
//! retried until the overall deadline has elapsed, after which the last error is handed back
//! untouched.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Backoff parameters for one kind of external call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Shortest wait between two attempts.
    pub min_wait: Duration,
    /// Longest wait between two attempts.
    pub max_wait: Duration,
    /// Scale applied to the doubling sequence, in seconds.
    pub multiplier: f64,
    /// Total time budget measured from the first attempt.
    pub deadline: Duration,
}

impl RetryPolicy {
    /// Policy with the default multiplier of one second.
    pub const fn new(min_wait: Duration, max_wait: Duration, deadline: Duration) -> Self {
        Self {
            min_wait,
            max_wait,
            multiplier: 1.0,
            deadline,
        }
    }

    /// Wait applied after the given (1-based) failed attempt.
    pub fn wait_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let seconds = self.multiplier * 2f64.powi(exponent);
        let raw = Duration::try_from_secs_f64(seconds).unwrap_or(self.max_wait);
        raw.min(self.max_wait).max(self.min_wait)
    }
}

/// Run `operation` until it succeeds or the policy deadline has passed.
///
/// The deadline is checked after each failure, so the operation always runs at least once and
/// an attempt already in flight is never interrupted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 1;
    loop {
        tracing::info!(
            operation = label,
            attempt,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Calling external service"
        );
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = label,
                        attempt,
                        "External call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => {
                let elapsed = started.elapsed();
                if elapsed >= policy.deadline {
                    tracing::error!(
                        operation = label,
                        attempt,
                        elapsed_secs = elapsed.as_secs_f64(),
                        error = %error,
                        "Retry budget exhausted"
                    );
                    return Err(error);
                }
                let wait = policy.wait_after(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    wait_secs = wait.as_secs_f64(),
                    error = %error,
                    "External call failed; backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
