//! Distributed per-host rate limiter
//!
//! A claim is a single-slot ticket: the winner stores `now + delay` under the
//! host's pacing key and everyone else is told when to come back. No lock is
//! held across the fetch, so a crashed claimant only costs one delay window.
//!
//! When the shared store is unreachable the limiter either decides locally
//! with the same rule ([`DegradedMode::Local`]) or refuses to claim
//! ([`DegradedMode::Refuse`]).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{host_key, retry_after_key};
use crate::clock::SharedClock;
use crate::config::{DegradedMode, PolitenessConfig};
use crate::models::RateLimitEntry;
use crate::store::{decide_claim, ClaimOutcome, RateLimitStore};
use crate::utils::error::StoreError;

/// The local map is pruned of stale entries once it grows past this size
const LOCAL_PRUNE_THRESHOLD: usize = 10_000;

/// In-process pacing state used while the shared store is unreachable
#[derive(Debug, Default)]
struct LocalState {
    hosts: HashMap<String, RateLimitEntry>,
}

impl LocalState {
    fn prune(&mut self, now_ms: i64) {
        if self.hosts.len() > LOCAL_PRUNE_THRESHOLD {
            self.hosts.retain(|_, entry| entry.is_live(now_ms));
        }
    }
}

/// Per-host pacing shared across all crawler processes
pub struct DistributedRateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: SharedClock,
    config: PolitenessConfig,
    key_prefix: String,
    local: Mutex<LocalState>,
}

impl DistributedRateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: SharedClock,
        config: PolitenessConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            key_prefix: key_prefix.into(),
            local: Mutex::new(LocalState::default()),
        }
    }

    /// Pacing key for a host under this limiter's prefix
    pub fn host_key(&self, host: &str) -> String {
        host_key(&self.key_prefix, host)
    }

    /// Clamp a requested delay into the configured bounds
    pub fn clamp_delay(&self, delay_ms: u64) -> u64 {
        self.config.clamp_delay(delay_ms)
    }

    /// Delay used when the caller has no host-specific value
    pub fn default_delay_ms(&self) -> u64 {
        self.config.default_delay_ms
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Atomically claim the next crawl slot for `host_key`
    ///
    /// Returns `(allowed, next_allowed)` as a [`ClaimOutcome`]. An active
    /// Retry-After window denies without touching the pacing key.
    pub async fn try_claim_next_crawl(
        &self,
        host_key: &str,
        now_ms: i64,
        delay_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<ClaimOutcome, StoreError> {
        let delay_ms = self.clamp_delay(delay_ms);

        let shared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            result = self.claim_shared(host_key, now_ms, delay_ms) => result,
        };

        let outcome = match shared {
            Ok(outcome) => outcome,
            Err(e) if e.is_unavailable() => match self.config.degraded_mode {
                DegradedMode::Refuse => {
                    warn!(host_key = %host_key, error = %e, "Rate-limit store unavailable, refusing claim");
                    return Err(e);
                }
                DegradedMode::Local => {
                    warn!(
                        host_key = %host_key,
                        error = %e,
                        "Rate-limit store unavailable, pacing locally"
                    );
                    crate::metrics::record_degraded_claim();
                    self.claim_local(host_key, now_ms, delay_ms, cancel).await?
                }
            },
            Err(e) => return Err(e),
        };

        crate::metrics::record_claim(outcome.allowed);
        debug!(
            host_key = %host_key,
            allowed = outcome.allowed,
            next_allowed = outcome.next_allowed,
            "Rate-limit claim"
        );
        Ok(outcome)
    }

    async fn claim_shared(
        &self,
        host_key: &str,
        now_ms: i64,
        delay_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        self.store
            .try_claim(host_key, &retry_after_key(host_key), now_ms, delay_ms)
            .await
    }

    async fn claim_local(
        &self,
        host_key: &str,
        now_ms: i64,
        delay_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<ClaimOutcome, StoreError> {
        let retry_until = self
            .local
            .lock()
            .await
            .hosts
            .get(host_key)
            .and_then(|entry| entry.retry_after_until);

        let now_ms = match retry_until {
            Some(until) if until > now_ms => {
                let wait = Duration::from_millis((until - now_ms) as u64);
                debug!(host_key = %host_key, wait_ms = wait.as_millis() as u64, "Waiting out Retry-After locally");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
                self.clock.now_millis().max(until)
            }
            _ => now_ms,
        };

        let mut local = self.local.lock().await;
        local.prune(now_ms);

        let current = local.hosts.get(host_key).map(|e| e.next_allowed_request);
        let outcome = decide_claim(current, now_ms, delay_ms);
        if outcome.allowed {
            local
                .hosts
                .entry(host_key.to_string())
                .or_default()
                .next_allowed_request = outcome.next_allowed;
        }
        Ok(outcome)
    }

    /// Record a Retry-After window for `host`
    ///
    /// Falls back to the local map when the shared store is unreachable.
    pub async fn record_retry_after(
        &self,
        host: &str,
        until: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = self.host_key(host);
        let until_ms = until.timestamp_millis();
        let now_ms = self.clock.now_millis();

        match self
            .store
            .set_retry_after(&retry_after_key(&key), until_ms, now_ms)
            .await
        {
            Ok(()) => {
                debug!(host = %host, until = %until, "Recorded Retry-After");
                Ok(())
            }
            Err(e) if e.is_unavailable() => {
                warn!(host = %host, error = %e, "Rate-limit store unavailable, recording Retry-After locally");
                if until_ms > now_ms {
                    let mut local = self.local.lock().await;
                    local.prune(now_ms);
                    local.hosts.entry(key).or_default().retry_after_until = Some(until_ms);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
