// Retry helper: bounded attempts with exponential backoff for image and
// playlist-side requests. Segment failures are not retried here; the worker
// pool and the journal replay handle those.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::DownloadError;
use crate::config::FetcherConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds up to `base_delay / 2` of random jitter.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn for_images(config: &FetcherConfig) -> Self {
        Self {
            max_attempts: config.image_max_attempts,
            base_delay: config.image_retry_delay,
            max_delay: config.image_max_retry_delay,
            jitter: false,
        }
    }

    /// Delay before attempt `failed_attempts + 1`.
    fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let headroom_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit = jitter_range_ms.min(headroom_ms);
        if limit == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::rng().random_range(0..limit))
    }
}

/// Outcome of one attempt.
pub enum Attempt<T> {
    Done(T),
    /// Transient failure; another attempt may succeed.
    Retry(DownloadError),
    /// Permanent failure; stop immediately.
    Fail(DownloadError),
}

/// Run `operation` until it succeeds, fails permanently, runs out of
/// attempts, or `token` is cancelled. The closure receives the 1-based
/// attempt number.
pub async fn with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, DownloadError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let err = match operation(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(err) => return Err(err),
            Attempt::Retry(err) => err,
        };

        if attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_after(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Connect, timeout, request and body errors are transient; redirect loops
/// and builder errors are not.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: false,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..32 {
            assert!(policy.delay_after(2) <= Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn transient_errors_use_every_attempt() {
        let attempts = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = with_backoff(&quick_policy(3), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Attempt::Retry(DownloadError::SegmentEmpty) }
        })
        .await;
        assert!(matches!(result, Err(DownloadError::SegmentEmpty)));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let attempts = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = with_backoff(&quick_policy(5), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { Attempt::Fail(DownloadError::image_fetch("u", "not an image", false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let token = CancellationToken::new();
        let result = with_backoff(&quick_policy(3), &token, |attempt| async move {
            if attempt < 2 {
                Attempt::Retry(DownloadError::SegmentEmpty)
            } else {
                Attempt::Done(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result = with_backoff(&quick_policy(3), &token, |_| async { Attempt::Done(1) }).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }
}
