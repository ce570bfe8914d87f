//! Crawl policy chain
//!
//! Every fetch attempt passes through an ordered list of policies before the
//! fetch action runs. A policy gets the remaining chain as a [`Next`] handle
//! and may call it, answer without calling it, or fail.
//!
//! ```rust,ignore
//! let chain = PolicyChain::new()
//!     .with(RobotsTxtPolicy::new(robots, user_agent))
//!     .with(PolitenessPolicy::new(limiter, due_queue, delay_ms));
//!
//! let metadata = chain.execute(&url, &fetcher, &cancel).await?;
//! ```

pub mod politeness;
pub mod robots;

pub use politeness::PolitenessPolicy;
pub use robots::RobotsTxtPolicy;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{ScheduledUrl, UrlContentMetadata};

/// The terminal step of the chain
#[async_trait]
pub trait FetchAction: Send + Sync {
    async fn fetch(
        &self,
        url: &ScheduledUrl,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata>;
}

#[async_trait]
impl<F, Fut> FetchAction for F
where
    F: Fn(ScheduledUrl, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<UrlContentMetadata>> + Send + 'static,
{
    async fn fetch(
        &self,
        url: &ScheduledUrl,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        (self)(url.clone(), cancel.clone()).await
    }
}

/// One gate in front of the fetch action
#[async_trait]
pub trait CrawlPolicy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn apply(
        &self,
        url: &ScheduledUrl,
        next: Next<'_>,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata>;
}

/// The rest of the chain after the current policy
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn CrawlPolicy>],
    action: &'a dyn FetchAction,
}

impl<'a> Next<'a> {
    /// Run the remaining policies, then the fetch action
    pub fn run<'b>(
        self,
        url: &'b ScheduledUrl,
        cancel: &'b CancellationToken,
    ) -> BoxFuture<'b, Result<UrlContentMetadata>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            match self.policies.split_first() {
                Some((policy, rest)) => {
                    let next = Next {
                        policies: rest,
                        action: self.action,
                    };
                    policy.apply(url, next, cancel).await
                }
                None => self.action.fetch(url, cancel).await,
            }
        })
    }

    /// Policies still ahead, not counting the fetch action
    pub fn remaining(&self) -> usize {
        self.policies.len()
    }
}

/// Ordered list of policies; execution order is insertion order
#[derive(Clone, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<dyn CrawlPolicy>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an existing list
    pub fn from_policies(policies: Vec<Arc<dyn CrawlPolicy>>) -> Self {
        Self { policies }
    }

    /// Append a policy
    pub fn with(mut self, policy: impl CrawlPolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policy names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Run `url` through every policy and, if none short-circuits, the action
    pub async fn execute(
        &self,
        url: &ScheduledUrl,
        action: &dyn FetchAction,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        let next = Next {
            policies: &self.policies,
            action,
        };
        next.run(url, cancel).await
    }
}
