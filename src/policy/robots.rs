//! robots.txt gate

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CrawlPolicy, Next};
use crate::error::{Error, Result};
use crate::models::{ScheduledUrl, UrlContentMetadata};
use crate::robots::RobotsCompliance;

/// Vetoes URLs disallowed by robots.txt; fails open when the check fails
pub struct RobotsTxtPolicy {
    robots: Arc<dyn RobotsCompliance>,
    user_agent: String,
}

impl RobotsTxtPolicy {
    pub fn new(robots: Arc<dyn RobotsCompliance>, user_agent: impl Into<String>) -> Self {
        Self {
            robots,
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl CrawlPolicy for RobotsTxtPolicy {
    fn name(&self) -> &'static str {
        "robots"
    }

    async fn apply(
        &self,
        url: &ScheduledUrl,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        let check = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            check = self.robots.is_allowed(&url.url, &self.user_agent) => check,
        };

        match check {
            Ok(true) => next.run(url, cancel).await,
            Ok(false) => {
                info!(url = %url.url, host = %url.host, "Blocked by robots.txt");
                crate::metrics::record_robots_blocked();
                Ok(UrlContentMetadata::blocked())
            }
            Err(e) => {
                warn!(url = %url.url, error = %e, "robots.txt check failed, proceeding");
                crate::metrics::record_robots_fail_open();
                next.run(url, cancel).await
            }
        }
    }
}
