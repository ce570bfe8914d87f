//! Due queue of deferred work
//!
//! Work the rate limiter could not admit is parked in a sorted set scored by
//! the epoch millis at which it becomes due. Removal is atomic with retrieval,
//! so an entry is handed to exactly one drainer.

pub mod worker;

pub use worker::{DrainStats, DueQueueWorker, WorkHandler};

use std::sync::Arc;

use crate::models::{DueQueueEntry, ScheduledUrl};
use crate::politeness::due_queue_key;
use crate::store::RateLimitStore;
use crate::utils::error::StoreError;

/// Deferred work keyed by due time
#[derive(Clone)]
pub struct DueQueue {
    store: Arc<dyn RateLimitStore>,
    key: String,
}

impl DueQueue {
    pub fn new(store: Arc<dyn RateLimitStore>, key_prefix: &str) -> Self {
        Self {
            store,
            key: due_queue_key(key_prefix),
        }
    }

    /// Sorted-set key backing this queue
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Park `payload` until `due_at_ms`
    ///
    /// Enqueueing the same payload twice keeps one entry with the later score.
    pub async fn enqueue(&self, payload: &str, due_at_ms: i64) -> Result<(), StoreError> {
        self.store.enqueue_due(&self.key, payload, due_at_ms).await
    }

    /// Park a prepared entry
    pub async fn push(&self, entry: &DueQueueEntry) -> Result<(), StoreError> {
        self.enqueue(&entry.payload, entry.due_at).await
    }

    /// Serialize and park a scheduled URL
    pub async fn enqueue_url(&self, url: &ScheduledUrl, due_at_ms: i64) -> Result<(), StoreError> {
        let payload = url.to_json()?;
        self.enqueue(&payload, due_at_ms).await
    }

    /// Remove and return up to `max_count` payloads due by `now_ms`
    pub async fn dequeue_due(&self, now_ms: i64, max_count: usize) -> Result<Vec<String>, StoreError> {
        self.store.dequeue_due(&self.key, now_ms, max_count).await
    }

    /// Entries currently waiting
    pub async fn len(&self) -> Result<u64, StoreError> {
        self.store.due_len(&self.key).await
    }
}

/// Decoded due-queue entry
///
/// Entries written by this crate are structured; older producers pushed the
/// bare URL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuePayload {
    Scheduled(ScheduledUrl),
    BareUrl(String),
}

impl DuePayload {
    /// Structured JSON first, otherwise the whole payload is a bare URL
    pub fn decode(payload: &str) -> Self {
        match ScheduledUrl::from_json(payload) {
            Ok(url) => Self::Scheduled(url),
            Err(_) => Self::BareUrl(payload.trim().to_string()),
        }
    }

    /// Unit of work to replay, if one can be built
    ///
    /// Bare URLs get the nil id and priority 0; `None` means the bare URL has
    /// no parseable host.
    pub fn into_scheduled(self) -> Option<ScheduledUrl> {
        match self {
            Self::Scheduled(url) => Some(url),
            Self::BareUrl(raw) => ScheduledUrl::from_bare_url(&raw),
        }
    }
}
