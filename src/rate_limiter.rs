//! Request rate limiting using a token bucket
//!
//! The threat-intel API enforces a per-minute request quota. All callers share
//! one bucket, so concurrent jobs queue behind each other instead of tripping
//! HTTP 429 responses.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Simple token bucket
struct TokenBucket {
    /// Available tokens
    tokens: f64,
    /// Last refill time
    last_refill: Instant,
    /// Tokens per second
    rate: f64,
    /// Maximum burst size
    capacity: u32,
}

impl TokenBucket {
    fn new(rate: f64, capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
            rate,
            capacity,
        }
    }

    /// Take a token, or report how long until one is available
    fn try_consume(&mut self) -> Option<Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        }
    }
}

/// Shared request limiter (cloneable, all clones share one bucket)
#[derive(Clone)]
pub struct RequestLimiter {
    bucket: Arc<Mutex<TokenBucket>>,
}

impl RequestLimiter {
    /// Limiter allowing `requests_per_minute` requests, bursting up to the same amount
    ///
    /// # Examples
    ///
    /// ```
    /// use torrent_quarantine::rate_limiter::RequestLimiter;
    ///
    /// // Public VirusTotal quota
    /// let limiter = RequestLimiter::per_minute(4);
    /// ```
    #[must_use]
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1);
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                capacity as f64 / 60.0,
                capacity,
            ))),
        }
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        loop {
            // Hold the lock only while touching the bucket, never across the sleep
            let wait = self.bucket.lock().await.try_consume();
            match wait {
                None => return,
                Some(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis(), "rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_allows_burst_then_reports_wait() {
        let mut bucket = TokenBucket::new(1.0, 2);
        assert!(bucket.try_consume().is_none());
        assert!(bucket.try_consume().is_none());

        let wait = bucket.try_consume().expect("bucket should be empty");
        assert!(wait <= Duration::from_secs(1));
        assert!(wait > Duration::from_millis(900));
    }

    #[tokio::test]
    async fn burst_is_immediate() {
        let limiter = RequestLimiter::per_minute(4);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_refill() {
        let limiter = RequestLimiter::per_minute(60);
        {
            let mut bucket = limiter.bucket.lock().await;
            bucket.tokens = 0.0;
        }

        let handle = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.acquire().await }
        });

        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("acquire should finish after refill")
            .unwrap();
    }
}
