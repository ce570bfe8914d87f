//! Crawl worker
//!
//! Takes scheduled URLs off the transport (or from the due queue drain), runs
//! them through the policy chain and reports how the crawl ended back to the
//! URL store. Deferred URLs are left in-flight; the due queue owns them until
//! they are replayed.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::FetchConfig;
use crate::due_queue::WorkHandler;
use crate::error::{Error, Result};
use crate::models::{FetchOutcome, ScheduledUrl, UrlContentMetadata};
use crate::policy::{FetchAction, PolicyChain};
use crate::storage::UrlRepository;
use crate::transport::UrlConsumer;
use crate::utils::error::TransportError;

/// Pause after a transport error before consuming again
const TRANSPORT_ERROR_PAUSE: Duration = Duration::from_secs(1);

pub struct CrawlWorker {
    chain: PolicyChain,
    action: Arc<dyn FetchAction>,
    repo: Arc<dyn UrlRepository>,
    clock: SharedClock,
    recrawl_interval: ChronoDuration,
    failure_recrawl: ChronoDuration,
    concurrency: usize,
}

impl CrawlWorker {
    pub fn new(
        chain: PolicyChain,
        action: Arc<dyn FetchAction>,
        repo: Arc<dyn UrlRepository>,
        clock: SharedClock,
        config: &FetchConfig,
    ) -> Self {
        Self {
            chain,
            action,
            repo,
            clock,
            recrawl_interval: ChronoDuration::seconds(config.recrawl_interval_secs as i64),
            failure_recrawl: ChronoDuration::seconds(config.failure_recrawl_secs as i64),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Crawl one URL and record the outcome
    ///
    /// A chain failure on a backlog URL is recorded as a failed fetch and is
    /// not returned as an error. URLs without a backlog row (legacy due-queue
    /// entries) have nothing to record, so their failures are returned.
    pub async fn crawl(
        &self,
        url: &ScheduledUrl,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        let result = self.chain.execute(url, self.action.as_ref(), cancel).await;

        let metadata = match result {
            Ok(metadata) if metadata.was_deferred => return Ok(metadata),
            Ok(metadata) => metadata,
            Err(e) if e.is_cancelled() || !url.has_backlog_row() => return Err(e),
            Err(e) => {
                warn!(url = %url.url, host = %url.host, error = %e, "Crawl failed");
                self.complete(url, FetchOutcome::Failed).await?;
                return Ok(UrlContentMetadata::default());
            }
        };

        let outcome = if metadata.was_blocked || metadata.is_success() {
            FetchOutcome::Succeeded
        } else {
            FetchOutcome::Failed
        };

        if url.has_backlog_row() {
            self.complete(url, outcome).await?;
        }

        debug!(
            url = %url.url,
            status = metadata.status_code,
            blocked = metadata.was_blocked,
            "Crawl finished"
        );
        Ok(metadata)
    }

    async fn complete(&self, url: &ScheduledUrl, outcome: FetchOutcome) -> Result<()> {
        let now = self.clock.now();
        let next_crawl_at = match outcome {
            FetchOutcome::Succeeded => now + self.recrawl_interval,
            FetchOutcome::Failed => now + self.failure_recrawl,
        };

        let recorded = self
            .repo
            .mark_fetch_completed(url.id, outcome, next_crawl_at, now)
            .await
            .map_err(|e| {
                error!(url = %url.url, id = %url.id, error = %e, "Failed to record crawl outcome");
                Error::from(e)
            })?;

        if !recorded {
            warn!(url = %url.url, id = %url.id, "Stale crawl completion ignored, URL no longer in flight");
        }
        Ok(())
    }

    /// Consume from `consumer` until cancelled, crawling up to
    /// `fetch.concurrency` URLs at a time
    ///
    /// Returns after in-progress crawls finish.
    pub async fn run(self: Arc<Self>, consumer: Arc<dyn UrlConsumer>, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        info!(concurrency = self.concurrency, "Crawl worker started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let url = match consumer.consume(&cancel).await {
                Ok(Some(url)) => url,
                Ok(None) => break,
                Err(TransportError::Closed) => {
                    warn!("Transport closed, stopping worker");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to consume work");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(TRANSPORT_ERROR_PAUSE) => continue,
                    }
                }
            };

            let worker = Arc::clone(&self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match worker.crawl(&url, &cancel).await {
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => {
                        debug!(url = %url.url, "Crawl interrupted by shutdown");
                    }
                    Err(e) => error!(url = %url.url, error = %e, "Crawl aborted"),
                }
            });

            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        info!("Crawl worker stopped");
    }
}

#[async_trait]
impl WorkHandler for CrawlWorker {
    async fn handle(
        &self,
        url: ScheduledUrl,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        self.crawl(&url, cancel).await
    }
}
