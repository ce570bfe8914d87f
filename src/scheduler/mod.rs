//! Backlog scheduler
//!
//! Moves idle, due URLs from the persistent store to the transport. Each poll
//! claims a batch (the rows flip to in-flight in the same transaction) and
//! publishes it. Any number of schedulers may poll the same store: claims skip
//! rows locked by another scheduler, so no URL is handed out twice.
//!
//! If publishing fails after a claim, the rows stay in-flight and are returned
//! to the backlog by orphan recovery.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::SharedClock;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::models::ScheduledUrl;
use crate::storage::UrlRepository;
use crate::transport::UrlPublisher;
use crate::utils::error::RepositoryError;

pub struct Scheduler {
    repo: Arc<dyn UrlRepository>,
    publisher: Arc<dyn UrlPublisher>,
    clock: SharedClock,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn UrlRepository>,
        publisher: Arc<dyn UrlPublisher>,
        clock: SharedClock,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            publisher,
            clock,
            config,
        }
    }

    /// Claim up to `limit` ready URLs, marking them in-flight
    pub async fn claim_ready_urls(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<ScheduledUrl>, RepositoryError> {
        let claimed = self.repo.claim_idle_due(self.clock.now(), limit).await?;
        Ok(claimed.iter().map(|u| u.to_scheduled()).collect())
    }

    /// One poll: claim a batch and publish it; returns the number published
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let urls = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            claimed = self.claim_ready_urls(self.config.batch_size) => claimed?,
        };

        if urls.is_empty() {
            return Ok(0);
        }
        crate::metrics::record_scheduler_claimed(urls.len());

        // Publishing is not raced against cancellation: the rows are already
        // in-flight and should reach a worker if at all possible.
        if let Err(e) = self.publisher.publish(&urls).await {
            error!(
                count = urls.len(),
                error = %e,
                "Failed to publish claimed URLs, left for orphan recovery"
            );
            return Err(e.into());
        }

        debug!(count = urls.len(), "Published ready URLs");
        Ok(urls.len())
    }

    /// Poll until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(
            interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Scheduler started"
        );

        loop {
            match self.run_once(&cancel).await {
                // A full batch suggests more is ready; poll again right away
                Ok(n) if n >= self.config.batch_size && n > 0 => continue,
                Ok(_) => {}
                Err(Error::Cancelled) => break,
                Err(e) => error!(error = %e, "Scheduler poll failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Scheduler stopped");
    }
}
