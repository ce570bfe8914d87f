//! In-process rate-limit store
//!
//! Same contract as the Redis store, scoped to one process. Used by tests and
//! single-binary deployments.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

use super::{decide_claim, ClaimOutcome, RateLimitStore, PACING_TTL_SLACK_MS};
use crate::utils::error::StoreError;

/// Value with an absolute expiry in epoch millis
#[derive(Debug, Clone, Copy)]
struct Expiring {
    value: i64,
    expires_at: i64,
}

impl Expiring {
    fn live(&self, now_ms: i64) -> Option<i64> {
        (self.expires_at > now_ms).then_some(self.value)
    }
}

/// One sorted set: ordered index plus member lookup for idempotent adds
#[derive(Debug, Default)]
struct SortedSet {
    by_score: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl SortedSet {
    fn add(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(old, member.to_string()));
        }
        self.by_score.insert((score, member.to_string()));
    }

    fn pop_due(&mut self, now_ms: i64, max_count: usize) -> Vec<String> {
        let due: Vec<(i64, String)> = self
            .by_score
            .iter()
            .take_while(|(score, _)| *score <= now_ms)
            .take(max_count)
            .cloned()
            .collect();

        for entry in &due {
            self.by_score.remove(entry);
            self.scores.remove(&entry.1);
        }

        due.into_iter().map(|(_, member)| member).collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    pacing: HashMap<String, Expiring>,
    retry_after: HashMap<String, i64>,
    queues: HashMap<String, SortedSet>,
}

/// Single-process [`RateLimitStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw pacing value for `key`, ignoring expiry
    pub async fn pacing_value(&self, key: &str) -> Option<i64> {
        self.inner.lock().await.pacing.get(key).map(|e| e.value)
    }

    /// Seed a pacing value, as if a previous claim had stored it
    pub async fn set_pacing_value(&self, key: &str, next_allowed: i64) {
        self.inner.lock().await.pacing.insert(
            key.to_string(),
            Expiring {
                value: next_allowed,
                expires_at: i64::MAX,
            },
        );
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn try_claim(
        &self,
        key: &str,
        retry_key: &str,
        now_ms: i64,
        delay_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(&until) = inner.retry_after.get(retry_key) {
            if until > now_ms {
                return Ok(ClaimOutcome::denied(until));
            }
        }

        let current = inner.pacing.get(key).and_then(|e| e.live(now_ms));
        let outcome = decide_claim(current, now_ms, delay_ms);

        if outcome.allowed {
            let ttl = delay_ms.saturating_add(PACING_TTL_SLACK_MS) as i64;
            inner.pacing.insert(
                key.to_string(),
                Expiring {
                    value: outcome.next_allowed,
                    expires_at: now_ms.saturating_add(ttl),
                },
            );
        }

        Ok(outcome)
    }

    async fn retry_after_until(&self, key: &str) -> Result<Option<i64>, StoreError> {
        // Expiry is left to the caller, which compares against its own clock
        Ok(self.inner.lock().await.retry_after.get(key).copied())
    }

    async fn set_retry_after(
        &self,
        key: &str,
        until_ms: i64,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        if until_ms <= now_ms {
            return Ok(());
        }

        self.inner
            .lock()
            .await
            .retry_after
            .insert(key.to_string(), until_ms);
        Ok(())
    }

    async fn enqueue_due(
        &self,
        queue: &str,
        payload: &str,
        due_at_ms: i64,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_default()
            .add(payload, due_at_ms);
        Ok(())
    }

    async fn dequeue_due(
        &self,
        queue: &str,
        now_ms: i64,
        max_count: usize,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get_mut(queue)
            .map(|set| set.pop_due(now_ms, max_count))
            .unwrap_or_default())
    }

    async fn due_len(&self, queue: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get(queue)
            .map(|set| set.by_score.len() as u64)
            .unwrap_or(0))
    }
}
