//! Bounded retry of transient platform failures
//!
//! Only errors for which [`PlatformError::is_transient`] holds are retried;
//! rejections surface immediately. Backoff doubles from `base_delay` and is
//! capped at `max_delay`. Each wait goes through the injected [`Clock`] and
//! aborts early on cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::PlatformError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(2_u32.pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The last attempt failed with a non-retryable error or retries ran out
    Failed { error: PlatformError, attempts: u32 },
    /// Cancelled before or between attempts
    Cancelled { attempts: u32 },
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// The closure receives the 1-based attempt number. On success returns the
/// value with the number of attempts used.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<(T, u32), RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok((value, attempt));
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Transient error during {} (attempt {}/{}): {}. Retrying in {:?}...",
                    label, attempt, max_attempts, e, delay
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                    _ = clock.sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("{} failed after {} attempts: {}", label, attempt, e);
                }
                return Err(RetryError::Failed {
                    error: e,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(64), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let clock = ManualClock::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<((), u32), _> =
            with_retry(&RetryPolicy::default(), &clock, &cancel, "create", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::Network("HTTP 500".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(RetryError::Failed { attempts: 3, .. })
        ));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let clock = ManualClock::default();
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<((), u32), _> =
            with_retry(&RetryPolicy::default(), &clock, &cancel, "create", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PlatformError::Rejected("Invalid parameter".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Failed { attempts: 1, .. })));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let clock = ManualClock::default();
        let cancel = CancellationToken::new();

        let result = with_retry(&RetryPolicy::default(), &clock, &cancel, "finalize", |attempt| {
            async move {
                if attempt == 1 {
                    Err(PlatformError::RateLimit("slow down".to_string()))
                } else {
                    Ok("post-1")
                }
            }
        })
        .await;

        assert_eq!(result, Ok(("post-1", 2)));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let clock = ManualClock::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<((), u32), _> =
            with_retry(&RetryPolicy::default(), &clock, &cancel, "create", |_| async {
                Ok(())
            })
            .await;

        assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
    }
}
