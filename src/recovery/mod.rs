//! Orphan recovery
//!
//! A worker that dies mid-fetch leaves its URL in-flight forever. The sweeper
//! finds in-flight URLs whose status has not moved for longer than the stuck
//! threshold and returns them to idle, due again after a short delay. A sweep
//! handles at most `batch_limit` rows; the rest wait for the next tick.
//!
//! The stuck threshold must exceed the longest time a healthy worker keeps a
//! URL in flight, including time spent deferred in the due queue.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::SharedClock;
use crate::config::RecoveryConfig;
use crate::storage::UrlRepository;
use crate::utils::error::RepositoryError;

pub struct OrphanRecovery {
    repo: Arc<dyn UrlRepository>,
    clock: SharedClock,
    config: RecoveryConfig,
}

impl OrphanRecovery {
    pub fn new(repo: Arc<dyn UrlRepository>, clock: SharedClock, config: RecoveryConfig) -> Self {
        Self {
            repo,
            clock,
            config,
        }
    }

    /// One sweep; returns the number of URLs returned to idle
    pub async fn sweep_once(&self) -> Result<u64, RepositoryError> {
        let now = self.clock.now();
        let older_than = now - ChronoDuration::seconds(self.config.stuck_threshold_secs as i64);

        let ids = self
            .repo
            .find_stuck_in_flight(older_than, self.config.batch_limit)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let next_crawl_at = now + ChronoDuration::seconds(self.config.recovery_delay_secs as i64);
        let recovered = self.repo.reset_to_idle(&ids, next_crawl_at, now).await?;

        crate::metrics::record_orphans_recovered(recovered);
        warn!(
            found = ids.len(),
            recovered,
            next_crawl_at = %next_crawl_at,
            "Recovered orphaned in-flight URLs"
        );
        Ok(recovered)
    }

    /// Sweep on an interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        info!(
            interval_secs = self.config.sweep_interval_secs,
            stuck_threshold_secs = self.config.stuck_threshold_secs,
            "Orphan recovery started"
        );

        loop {
            let sweep = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sweep = self.sweep_once() => sweep,
            };
            if let Err(e) = sweep {
                error!(error = %e, "Orphan sweep failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Orphan recovery stopped");
    }
}
