//! Shared rate-limit and due-queue store
//!
//! Every cross-process coordination primitive the politeness layer needs goes
//! through [`RateLimitStore`]: the per-host pacing claim, the Retry-After
//! window and the due-queue sorted set. Each operation is atomic per key.
//!
//! - [`RedisStore`] - shared store backed by Redis scripts
//! - [`MemoryStore`] - single-process store with identical semantics

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;

use crate::utils::error::StoreError;

/// Slack added to the pacing key TTL so that a live key always outlasts its window
pub const PACING_TTL_SLACK_MS: u64 = 1_000;

/// Result of a single pacing claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// Whether the caller may fetch now
    pub allowed: bool,
    /// Epoch millis of the next permitted request
    ///
    /// For an allowed claim this is `now + delay`; for a denied claim it is the
    /// stored value that caused the denial.
    pub next_allowed: i64,
}

impl ClaimOutcome {
    pub fn allowed(next_allowed: i64) -> Self {
        Self {
            allowed: true,
            next_allowed,
        }
    }

    pub fn denied(next_allowed: i64) -> Self {
        Self {
            allowed: false,
            next_allowed,
        }
    }
}

/// Backend for per-host pacing and deferred work
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically claim the next fetch slot for `key`
    ///
    /// A Retry-After window under `retry_key` that ends after `now_ms` denies
    /// with its end and leaves `key` untouched. Otherwise, if the stored
    /// timestamp is absent or not after `now_ms`, store `now_ms + delay_ms` and
    /// allow; else deny with the stored value. Both checks are one step.
    async fn try_claim(
        &self,
        key: &str,
        retry_key: &str,
        now_ms: i64,
        delay_ms: u64,
    ) -> Result<ClaimOutcome, StoreError>;

    /// End of the Retry-After window recorded under `key`, if any
    async fn retry_after_until(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Record a Retry-After window ending at `until_ms`
    ///
    /// Windows already in the past are ignored.
    async fn set_retry_after(&self, key: &str, until_ms: i64, now_ms: i64)
        -> Result<(), StoreError>;

    /// Add `payload` to the sorted set `queue` with score `due_at_ms`
    ///
    /// Re-adding an existing payload only moves its score.
    async fn enqueue_due(&self, queue: &str, payload: &str, due_at_ms: i64)
        -> Result<(), StoreError>;

    /// Atomically remove and return up to `max_count` payloads due by `now_ms`
    ///
    /// Payloads come back in ascending `due_at` order.
    async fn dequeue_due(
        &self,
        queue: &str,
        now_ms: i64,
        max_count: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Number of payloads waiting in `queue`
    async fn due_len(&self, queue: &str) -> Result<u64, StoreError>;
}

/// Apply the claim rule to an already-read value
///
/// Shared by [`MemoryStore`] and the degraded in-process path of the limiter so
/// both follow the same decision as the Redis script.
pub fn decide_claim(current: Option<i64>, now_ms: i64, delay_ms: u64) -> ClaimOutcome {
    match current {
        Some(next_allowed) if next_allowed > now_ms => ClaimOutcome::denied(next_allowed),
        _ => ClaimOutcome::allowed(now_ms.saturating_add(delay_ms as i64)),
    }
}
