//! Retry logic with linear backoff
//!
//! Two independent retry layers exist in the pipeline:
//! - [`with_retry`] wraps a single remote call and retries it in place
//!   (driven by [`RetryConfig`]).
//! - Job-level retries requeue a whole pipeline stage (driven by
//!   [`JobPolicy`](crate::config::JobPolicy)); see `pipeline::worker`.
//!
//! # Example
//!
//! ```no_run
//! use torrent_quarantine::retry::{IsRetryable, with_retry};
//! use torrent_quarantine::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, QuarantineError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, server busy, rate limits) should return `true`.
/// Permanent failures (bad credentials, missing records, bad input) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Server-requested wait before the next attempt, overriding the backoff
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Threat-intel errors carry their own code table
            Error::ThreatIntel(e) => e.is_retryable(),
            // Timeouts, refused connections and 5xx are transient
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Fetch { retryable, .. } => *retryable,
            // A missing quarantine object may still be landing on a slow disk
            Error::Quarantine(QuarantineError::ObjectMissing { .. }) => true,
            Error::Quarantine(_) => false,
            // Database errors should not be retried (likely permanent)
            Error::Database(_) | Error::Sqlx(_) => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Transition and precondition failures are permanent
            Error::Pipeline(_) => false,
            Error::NotFound(_) => false,
            Error::ShuttingDown => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::ThreatIntel(crate::error::ThreatIntelError::Api { retry_after, .. }) => {
                *retry_after
            }
            _ => None,
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base_delay × attempt`, capped
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = config.base_delay.saturating_mul(attempt.max(1));
    let delay = delay.min(config.max_delay);
    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Execute an async operation, retrying transient failures in place
///
/// `config.max_attempts` is the total number of attempts. Between attempts the
/// error's [`IsRetryable::retry_after`] wins over the linear backoff; either way
/// the wait counts against the same attempt budget.
///
/// Returns the successful result or the last error once the budget is spent or
/// a non-retryable error is seen.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| backoff_delay(config, attempt));

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
pub(crate) fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
