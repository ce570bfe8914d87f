//! Per-host pacing gate
//!
//! Claims the host's next crawl slot. Denied work is parked in the due queue
//! until the slot opens instead of being fetched now.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{CrawlPolicy, Next};
use crate::due_queue::DueQueue;
use crate::error::Result;
use crate::models::{ScheduledUrl, UrlContentMetadata};
use crate::politeness::DistributedRateLimiter;

pub struct PolitenessPolicy {
    limiter: Arc<DistributedRateLimiter>,
    due_queue: DueQueue,
    delay_ms: u64,
}

impl PolitenessPolicy {
    pub fn new(limiter: Arc<DistributedRateLimiter>, due_queue: DueQueue, delay_ms: u64) -> Self {
        Self {
            limiter,
            due_queue,
            delay_ms,
        }
    }

    /// Pace with the limiter's configured default delay
    pub fn with_default_delay(limiter: Arc<DistributedRateLimiter>, due_queue: DueQueue) -> Self {
        let delay_ms = limiter.default_delay_ms();
        Self::new(limiter, due_queue, delay_ms)
    }
}

#[async_trait]
impl CrawlPolicy for PolitenessPolicy {
    fn name(&self) -> &'static str {
        "politeness"
    }

    async fn apply(
        &self,
        url: &ScheduledUrl,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        let now_ms = self.limiter.clock().now_millis();
        let delay_ms = self.limiter.clamp_delay(self.delay_ms);
        let key = self.limiter.host_key(&url.host);

        let claim = self
            .limiter
            .try_claim_next_crawl(&key, now_ms, delay_ms, cancel)
            .await?;

        if claim.allowed {
            return next.run(url, cancel).await;
        }

        // Runs to completion even when cancelled
        if let Err(e) = self.due_queue.enqueue_url(url, claim.next_allowed).await {
            error!(url = %url.url, host = %url.host, error = %e, "Failed to defer URL");
            return Err(e.into());
        }

        crate::metrics::record_due_enqueued(claim.next_allowed - now_ms);
        debug!(
            url = %url.url,
            host = %url.host,
            due_at = claim.next_allowed,
            "Host busy, deferred to due queue"
        );
        Ok(UrlContentMetadata::deferred())
    }
}
