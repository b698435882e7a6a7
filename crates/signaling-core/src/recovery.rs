//! Connect policy for the signaling transport
//!
//! A session brings its transport up through [`retry_with_backoff`], both
//! on open and every time the connection drops afterwards. Transport
//! failures and timeouts are retried with exponential backoff; state and
//! argument errors end the attempt at once since they would fail the same
//! way again.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{SignalingError, SignalingResult};

/// How often and how patiently to (re)start a transport
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts in total, the first one included
    pub max_attempts: u32,
    /// Wait after the first failure
    pub initial_delay: Duration,
    /// Cap on any single wait
    pub max_delay: Duration,
    /// Growth of the wait per failure; values below 1 are treated as 1
    pub backoff_multiplier: f64,
    /// Spread each wait by up to 10% either way
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short waits for local or low-latency signaling servers
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// One attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait after failed attempt `attempt` (1-based), before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let growth = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1).min(64) as i32);
        let secs = self.initial_delay.as_secs_f64() * growth;
        if secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn wait_after(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.use_jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.9..=1.1))
        } else {
            base
        }
    }
}

/// Call `attempt_fn` until it succeeds or `policy` says to stop
///
/// Returns the last error once attempts are exhausted, or the first
/// non-recoverable one.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    policy: &RetryConfig,
    mut attempt_fn: F,
) -> SignalingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SignalingResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match attempt_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_recoverable() {
            debug!(operation, attempt, error = %err, category = err.category(), "Not retrying");
            return Err(err);
        }
        if attempt >= attempts {
            error!(operation, attempts, error = %err, "Giving up, retries exhausted");
            return Err(err);
        }

        let wait = policy.wait_after(attempt);
        warn!(
            operation,
            attempt,
            error = %err,
            retry_in_ms = wait.as_millis() as u64,
            "Attempt failed, backing off"
        );
        sleep(wait).await;
        attempt += 1;
    }
}

/// Await `future` for at most `limit`
pub async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    future: impl Future<Output = SignalingResult<T>>,
) -> SignalingResult<T> {
    tokio::time::timeout(limit, future).await.unwrap_or_else(|_| {
        let duration_ms = limit.as_millis() as u64;
        warn!(operation, duration_ms, "Gave up waiting");
        Err(SignalingError::OperationTimeout { duration_ms })
    })
}
