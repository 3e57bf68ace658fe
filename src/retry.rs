//! Bounded retry with linear backoff.
//!
//! Retry behavior is an explicit, unit-testable policy rather than
//! catch-and-loop control flow inside the callers. Both the Registry and
//! the mail transport use the same helper; transience is decided by the
//! caller-supplied predicate.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How many times to attempt an operation and how long to wait between
/// attempts. Backoff is linear: `base_delay * attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Run `op` up to `policy.max_attempts` times. Errors for which
/// `is_transient` returns false are returned immediately; transient
/// errors are retried with linear backoff until the attempt budget is
/// exhausted, at which point the last error is returned.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_transient(&e) => {
                warn!(
                    "{label}: transient failure, retry {attempt}/{max}: {e}",
                    max = policy.max_attempts
                );
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
