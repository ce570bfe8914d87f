//! Common test utilities

use async_trait::async_trait;
use hostpace::clock::ManualClock;
use hostpace::config::{DegradedMode, FetchConfig, PolitenessConfig};
use hostpace::crawler::{standard_chain, CrawlWorker};
use hostpace::due_queue::DueQueue;
use hostpace::error::Error;
use hostpace::models::{ScheduledUrl, UrlContentMetadata};
use hostpace::policy::FetchAction;
use hostpace::politeness::DistributedRateLimiter;
use hostpace::robots::RobotsCompliance;
use hostpace::storage::MemoryUrlRepository;
use hostpace::store::MemoryStore;
use hostpace::utils::error::RobotsError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const PREFIX: &str = "test";

/// robots.txt that allows everything
pub struct AllowAll;

#[async_trait]
impl RobotsCompliance for AllowAll {
    async fn is_allowed(&self, _: &str, _: &str) -> Result<bool, RobotsError> {
        Ok(true)
    }
}

/// Fetch action that records every URL it is asked to fetch
#[derive(Default)]
pub struct RecordingFetch {
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<ScheduledUrl>>,
}

impl RecordingFetch {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetchAction for RecordingFetch {
    async fn fetch(
        &self,
        url: &ScheduledUrl,
        _: &CancellationToken,
    ) -> Result<UrlContentMetadata, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().await.push(url.clone());
        Ok(UrlContentMetadata::fetched(200))
    }
}

pub fn politeness_config(default_delay_ms: u64) -> PolitenessConfig {
    PolitenessConfig {
        default_delay_ms,
        min_delay_ms: 100,
        max_delay_ms: 60_000,
        degraded_mode: DegradedMode::Local,
    }
}

/// In-memory stack wired the way the binary wires the real one
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub limiter: Arc<DistributedRateLimiter>,
    pub due_queue: DueQueue,
    pub repo: Arc<MemoryUrlRepository>,
    pub fetch: Arc<RecordingFetch>,
    pub worker: Arc<CrawlWorker>,
}

impl Harness {
    pub fn new(now_ms: i64, default_delay_ms: u64) -> Self {
        let clock = Arc::new(ManualClock::new(now_ms));
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(DistributedRateLimiter::new(
            store.clone(),
            clock.clone(),
            politeness_config(default_delay_ms),
            PREFIX,
        ));
        let due_queue = DueQueue::new(store.clone(), PREFIX);
        let repo = Arc::new(MemoryUrlRepository::new());
        let fetch = Arc::new(RecordingFetch::default());

        let chain = standard_chain(
            Arc::new(AllowAll),
            "hostpace-test",
            limiter.clone(),
            due_queue.clone(),
        );
        let worker = Arc::new(CrawlWorker::new(
            chain,
            fetch.clone(),
            repo.clone(),
            clock.clone(),
            &FetchConfig::default(),
        ));

        Self {
            clock,
            store,
            limiter,
            due_queue,
            repo,
            fetch,
            worker,
        }
    }
}
