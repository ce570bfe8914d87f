//! Decorrelated-jitter backoff and the retry wrapper built on it
//!
//! Each delay is drawn relative to the previous one so that many clients
//! retrying against the same host drift apart instead of retrying in lockstep.
//! Delays never fall below half the initial median and never exceed a fixed
//! multiple of it.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Growth bound relative to the initial median
const MAX_GROWTH_FACTOR: u64 = 64;

/// Absolute ceiling for a single delay
const MAX_DELAY_MS: u64 = 60_000;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,

    /// Median delay the sequence starts from
    pub initial_median: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_median: Duration::from_millis(1000),
        }
    }
}

impl BackoffConfig {
    pub fn new(max_retries: u32, initial_median: Duration) -> Self {
        Self {
            max_retries,
            initial_median,
        }
    }

    /// Fresh randomized delay sequence for one retry loop
    pub fn delays(&self) -> Vec<Duration> {
        backoff_delays(self.initial_median, self.max_retries)
    }
}

/// Decorrelated-jitter delay sequence of length `retry_count`
pub fn backoff_delays(initial_median: Duration, retry_count: u32) -> Vec<Duration> {
    backoff_delays_with_rng(initial_median, retry_count, &mut rand::thread_rng())
}

/// Same as [`backoff_delays`] with a caller-provided RNG
pub fn backoff_delays_with_rng<R: Rng + ?Sized>(
    initial_median: Duration,
    retry_count: u32,
    rng: &mut R,
) -> Vec<Duration> {
    let median = initial_median.as_millis().min(u128::from(u64::MAX)) as u64;
    if median == 0 {
        return vec![Duration::ZERO; retry_count as usize];
    }

    let (floor, cap) = delay_bounds(median);
    let mut prev = median;

    (0..retry_count)
        .map(|_| {
            let upper = prev.saturating_mul(3).min(cap).max(floor);
            let delay = rng.gen_range(floor..=upper);
            prev = delay;
            Duration::from_millis(delay)
        })
        .collect()
}

/// Inclusive `[floor, cap]` in milliseconds for a given median
pub fn delay_bounds(median_ms: u64) -> (u64, u64) {
    let floor = (median_ms / 2).max(1);
    let cap = median_ms
        .saturating_mul(MAX_GROWTH_FACTOR)
        .min(MAX_DELAY_MS)
        .max(median_ms);
    (floor, cap)
}

/// Why a retry loop gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Cancellation fired while waiting or running
    Cancelled,
    /// Error the predicate refused to retry
    Fatal(E),
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
}

/// Run `operation`, sleeping through `delays` between retryable failures
///
/// The operation runs at most `delays.len() + 1` times. Errors for which
/// `should_retry` returns false end the loop immediately.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    delays: &[Duration],
    cancel: &CancellationToken,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = operation(attempt) => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !should_retry(&err) {
            debug!(error = %err, "Non-retryable error encountered");
            return Err(RetryError::Fatal(err));
        }

        let Some(delay) = delays.get(attempt as usize).copied() else {
            warn!(
                attempts = attempt + 1,
                error = %err,
                "Retries exhausted"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt + 1,
                last: err,
            });
        };

        warn!(
            attempt = attempt,
            max_retries = delays.len(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Operation failed, will retry"
        );
        crate::metrics::record_fetch_retry();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
