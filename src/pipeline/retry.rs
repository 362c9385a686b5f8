//! Exponential-backoff retry for remote calls.
//!
//! HTTP 429 / 5xx and transport failures are retried up to
//! `max_retries` times after the first attempt; the wait before retry `n`
//! is `base * 2^(n-1)`. With the defaults (3 retries, 2 s base) the waits are
//! 2 s → 4 s → 8 s. Any other error returns immediately, and cancellation
//! interrupts both an in-flight attempt and a pending backoff sleep.

use crate::cancel::CancelToken;
use crate::config::BackendConfig;
use crate::error::{ErrorClass, IngestError};
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_backoff_ms))
    }

    /// No retries at all; used by the local backends.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Wait before retry number `retry` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` under `policy`, passing the 0-indexed attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    label: &str,
    mut op: F,
) -> Result<T, IngestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 0u32;
    loop {
        if attempt > 0 {
            let backoff = policy.delay_for(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(IngestError::Cancelled),
                _ = sleep(backoff) => {}
            }
        }
        cancel.check()?;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            r = op(attempt) => r,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => match e.class() {
                ErrorClass::Cancelled => {
                    debug!("{}: cancelled on attempt {}", label, attempt + 1);
                    return Err(e);
                }
                ErrorClass::Retryable if attempt < policy.max_retries => {
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                    attempt += 1;
                }
                _ => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn rate_limited() -> IngestError {
        IngestError::from_status("http://cloud", 429, "too many requests")
    }

    #[test]
    fn delays_double() {
        let p = RetryPolicy::new(3, Duration::from_millis(2000));
        assert_eq!(p.delay_for(1), Duration::from_millis(2000));
        assert_eq!(p.delay_for(2), Duration::from_millis(4000));
        assert_eq!(p.delay_for(3), Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let c = Arc::clone(&calls);
        let out = with_retry(&policy, &CancelToken::new(), "test", |_| {
            let c = Arc::clone(&c);
            async move {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(rate_limited()),
                    _ => Ok("text"),
                }
            }
        })
        .await;

        assert_eq!(out.unwrap(), "text");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(6000) && waited < Duration::from_millis(6050),
            "waited {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_four_rate_limits() {
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let out: Result<(), _> = with_retry(&policy, &CancelToken::new(), "test", |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;
        assert!(matches!(out, Err(IngestError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let out: Result<(), _> = with_retry(&policy, &CancelToken::new(), "test", |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(IngestError::from_status("http://cloud", 400, "bad request")) }
        })
        .await;
        assert!(matches!(out, Err(IngestError::ClientError { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let cancel = CancelToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };

        let c = Arc::clone(&calls);
        let start = Instant::now();
        let out: Result<(), _> = with_retry(&policy, &cancel, "test", |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;
        canceller.await.unwrap();

        assert!(matches!(out, Err(IngestError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn already_cancelled_never_calls() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let out: Result<(), _> = with_retry(&RetryPolicy::none(), &cancel, "test", |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(matches!(out, Err(IngestError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
