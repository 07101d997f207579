//! Exponential backoff around any [`Channel`].
//!
//! Only channel operations are retried. Upstream fetches never are: a failed
//! scrape aborts the run instead.
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//! - A rate limit answer waits for the server supplied `retry_after` instead

use super::{Channel, ChannelError};
use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Wrapper that adds exponential backoff retry logic to any [`Channel`] implementation.
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryChannel<T> {
    /// The underlying channel to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryChannel<T>
where
    T: Channel,
{
    /// Create a new retry wrapper around an existing [`Channel`] implementation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let channel = DiscordChannel::new(api_base, channel_id, &token)?;
    /// let channel = RetryChannel::new(channel, 5, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize, err: &ChannelError) -> StdDuration {
        if let ChannelError::RateLimited { retry_after } = err {
            return (*retry_after).min(self.max_delay);
        }
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let mut delay = self.base_delay.saturating_mul(1 << shift);
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }

    async fn with_retry<R, Fut>(&self, op: &'static str, mut call: impl FnMut() -> Fut) -> Result<R, ChannelError>
    where
        Fut: Future<Output = Result<R, ChannelError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match call().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() || attempt > self.max_retries {
                        error!(
                            op,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "channel operation failed"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt, &e);
                    warn!(
                        op,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "channel operation failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryChannel")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Channel for RetryChannel<T>
where
    T: Channel,
{
    #[instrument(level = "debug", skip_all)]
    async fn send_text(&self, content: &str) -> Result<(), ChannelError> {
        let inner = &self.inner;
        self.with_retry("send_text", move || inner.send_text(content)).await
    }

    #[instrument(level = "debug", skip_all)]
    async fn send_image(&self, path: &Path) -> Result<(), ChannelError> {
        let inner = &self.inner;
        self.with_retry("send_image", move || inner.send_image(path)).await
    }

    #[instrument(level = "debug", skip_all)]
    async fn purge_recent(&self, limit: usize) -> Result<usize, ChannelError> {
        let inner = &self.inner;
        self.with_retry("purge_recent", move || inner.purge_recent(limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{RecordingChannel, Sent};

    fn fast<T: Channel>(inner: T, retries: usize) -> RetryChannel<T> {
        RetryChannel::new(inner, retries, StdDuration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_through_rate_limits() {
        let inner = RecordingChannel {
            rate_limited: std::sync::Mutex::new(2),
            ..RecordingChannel::default()
        };
        let channel = fast(inner, 5);
        channel.send_text("hello").await.unwrap();
        assert_eq!(channel.inner.sent(), vec![Sent::Text("hello".to_string())]);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = RecordingChannel {
            rate_limited: std::sync::Mutex::new(10),
            ..RecordingChannel::default()
        };
        let channel = fast(inner, 2);
        let err = channel.send_text("hello").await.unwrap_err();
        assert!(matches!(err, ChannelError::RateLimited { .. }));
        assert_eq!(*channel.inner.rate_limited.lock().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let inner = RecordingChannel {
            fail_at: Some(0),
            ..RecordingChannel::default()
        };
        let channel = fast(inner, 5);
        let err = channel.send_image(Path::new("t.png")).await.unwrap_err();
        assert!(matches!(err, ChannelError::Api { .. }));
        assert!(channel.inner.sent().is_empty());
    }

    #[test]
    fn test_backoff_is_capped() {
        let channel = RetryChannel::new(RecordingChannel::default(), 5, StdDuration::from_secs(1));
        let err = ChannelError::Api {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        let delay = channel.backoff(10, &err);
        assert!(delay >= StdDuration::from_secs(30));
        assert!(delay <= StdDuration::from_millis(30_250));

        let limited = ChannelError::RateLimited {
            retry_after: StdDuration::from_millis(1500),
        };
        assert_eq!(channel.backoff(1, &limited), StdDuration::from_millis(1500));
    }
}
