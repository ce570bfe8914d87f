//! hostpace - crawl coordination core
//!
//! Keeps a fleet of independent crawler processes polite to every host they
//! touch, without any process owning a host.
//!
//! # Architecture
//!
//! - [`scheduler`] - claims idle, due URLs from the backlog and publishes them
//! - [`transport`] - hands scheduled URLs to crawl workers
//! - [`crawler`] - runs each URL through the policy chain and the HTTP fetcher
//! - [`policy`] - ordered chain of crawl policies (robots.txt, politeness)
//! - [`politeness`] - per-host rate limiter shared through [`store`]
//! - [`due_queue`] - deferred work, replayed once its host slot opens
//! - [`recovery`] - returns URLs stranded by crashed workers to the backlog
//! - [`storage`] - persistent URL backlog (PostgreSQL)
//! - [`robots`] - cached robots.txt checks
//! - [`config`], [`error`], [`metrics`], [`clock`], [`utils`] - shared plumbing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hostpace::clock::SystemClock;
//! use hostpace::config::Config;
//! use hostpace::politeness::DistributedRateLimiter;
//! use hostpace::store::MemoryStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let limiter = DistributedRateLimiter::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//!     config.politeness.clone(),
//!     config.redis.key_prefix.clone(),
//! );
//! let key = limiter.host_key("example.com");
//! # let _ = key;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod crawler;
pub mod due_queue;
pub mod error;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod politeness;
pub mod recovery;
pub mod robots;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod transport;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::crawler::{CrawlWorker, HttpFetcher};
    pub use crate::due_queue::{DueQueue, DueQueueWorker, WorkHandler};
    pub use crate::error::{Error, ErrorCategory, HostpaceErrorTrait, Result};
    pub use crate::models::{
        DiscoveredUrl, FetchOutcome, ScheduledUrl, UrlContentMetadata, UrlStatus,
    };
    pub use crate::policy::{CrawlPolicy, FetchAction, Next, PolicyChain};
    pub use crate::politeness::DistributedRateLimiter;
    pub use crate::recovery::OrphanRecovery;
    pub use crate::scheduler::Scheduler;
    pub use crate::storage::UrlRepository;
    pub use crate::store::RateLimitStore;
    pub use crate::transport::{UrlConsumer, UrlPublisher};
}

// Direct re-exports for convenience
pub use models::{DiscoveredUrl, ScheduledUrl, UrlContentMetadata, UrlStatus};
