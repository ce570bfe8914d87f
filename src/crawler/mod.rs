//! Crawling: the HTTP fetch action and the worker that drives it
//!
//! A worker runs each URL through the standard chain (robots.txt first, then
//! per-host politeness) in front of [`HttpFetcher`].

pub mod fetcher;
pub mod worker;

pub use fetcher::HttpFetcher;
pub use worker::CrawlWorker;

use std::sync::Arc;

use crate::due_queue::DueQueue;
use crate::policy::{PolicyChain, PolitenessPolicy, RobotsTxtPolicy};
use crate::politeness::DistributedRateLimiter;
use crate::robots::RobotsCompliance;

/// Robots check, then per-host pacing at the limiter's default delay
pub fn standard_chain(
    robots: Arc<dyn RobotsCompliance>,
    user_agent: &str,
    limiter: Arc<DistributedRateLimiter>,
    due_queue: DueQueue,
) -> PolicyChain {
    PolicyChain::new()
        .with(RobotsTxtPolicy::new(robots, user_agent))
        .with(PolitenessPolicy::with_default_delay(limiter, due_queue))
}
