//! Retry classification and exponential backoff
//!
//! Transient transfer failures put a task into `PausedRetry`; the scheduler
//! releases it once the backoff computed here has elapsed. Backoff grows
//! exponentially with the retry count, is capped at `max_delay`, and can be
//! jittered to prevent a thundering herd after a shared outage.

use crate::config::RetryConfig;
use crate::error::{Error, TransferError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (invalid destination, disk full, unsupported response) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transfer(e) => e.is_retryable(),
            // I/O errors can be retryable in some cases
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
            // Store, configuration and state errors need a caller to act
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::Download(_) => false,
            Error::ShuttingDown => false,
            Error::Serialization(_) => false,
            // Unknown errors - be conservative and don't retry
            Error::Other(_) => false,
        }
    }
}

impl From<Error> for TransferError {
    /// Collapse a crate error into the transfer taxonomy a worker reports
    fn from(err: Error) -> Self {
        match err {
            Error::Transfer(e) => e,
            other if other.is_retryable() => TransferError::Transient(other.to_string()),
            other => TransferError::Fatal(other.to_string()),
        }
    }
}

/// Base delay before retry number `attempt` (1-based), without jitter
///
/// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs)
}

/// Delay to wait before retry number `attempt`, jittered when configured
pub fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = backoff_delay(config, attempt);
    if config.jitter { add_jitter(delay) } else { delay }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    // Saturate instead of panicking when the doubled delay leaves Duration's range
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(Duration::MAX)
}
