//! Exponential backoff retry for model calls.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Default configuration: 3 total attempts, base 1s doubling, max 30s.
pub const MAX_ATTEMPTS: u32 = 3;
const INITIAL_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 30;

/// Port probed by the reachability diagnostic.
const PROBE_PORT: u16 = 443;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_interval: Duration::from_secs(INITIAL_INTERVAL_SECS),
            max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
        }
    }
}

impl RetryPolicy {
    /// Deterministic doubling schedule (1s, 2s, 4s, ... by default).
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Outcome of a retried operation that never succeeded.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that retrying cannot fix.
    NotRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NotRetryable(e) => e,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// `attempt` is called up to `policy.max_attempts` times. Errors for which
/// `is_retryable` returns false end the loop immediately. Between attempts
/// the task sleeps for an exponentially increasing duration.
pub async fn retry_with_backoff<T, E, Fut, F, R>(
    policy: &RetryPolicy,
    mut attempt: F,
    is_retryable: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::NotRetryable(e)),
            Err(e) if attempts >= max_attempts => {
                return Err(RetryError::Exhausted { attempts, last: e });
            }
            Err(e) => {
                let wait = backoff.next_backoff().unwrap_or(policy.max_interval);
                warn!(
                    "Attempt {attempts}/{max_attempts} failed: {e}. Retrying in {}s",
                    wait.as_secs_f32()
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// Whether a TCP connection to `host` on port 443 opens within 5 seconds.
///
/// Used only to explain repeated failures to the user.
pub async fn is_reachable(host: &str) -> bool {
    match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, PROBE_PORT))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            info!("Could not connect to {host}:{PROBE_PORT}: {e}");
            false
        }
        Err(_) => {
            info!("Connection to {host}:{PROBE_PORT} timed out");
            false
        }
    }
}
