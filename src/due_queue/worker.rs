//! Due queue drain loop
//!
//! Pops due entries on an interval and hands each one back to the crawl path.
//! An entry whose replay fails goes back into the queue. If putting it back
//! fails too, the entry is counted as lost and logged with its payload.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DuePayload, DueQueue};
use crate::clock::SharedClock;
use crate::config::DueQueueConfig;
use crate::error::Result;
use crate::models::{DueQueueEntry, ScheduledUrl, UrlContentMetadata};
use crate::utils::error::StoreError;

/// Receiver of replayed work
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(
        &self,
        url: ScheduledUrl,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata>;
}

/// Counts from one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub dequeued: usize,
    pub handled: usize,
    pub dropped: usize,
    pub requeued: usize,
    /// Removed from the queue but neither handled nor put back
    pub lost: usize,
}

enum Replay {
    Handled,
    Dropped,
    Requeued,
    Lost,
}

/// Periodic drainer feeding due entries to a [`WorkHandler`]
pub struct DueQueueWorker {
    queue: DueQueue,
    handler: Arc<dyn WorkHandler>,
    clock: SharedClock,
    config: DueQueueConfig,
}

impl DueQueueWorker {
    pub fn new(
        queue: DueQueue,
        handler: Arc<dyn WorkHandler>,
        clock: SharedClock,
        config: DueQueueConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            clock,
            config,
        }
    }

    /// Drain until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(
            queue = %self.queue.key(),
            interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Due queue worker started"
        );

        loop {
            match self.drain_once(&cancel).await {
                Ok(stats) if stats.dequeued > 0 => {
                    debug!(?stats, "Due queue drained");
                }
                Ok(_) => {}
                Err(StoreError::Cancelled) => break,
                Err(e) => error!(error = %e, "Due queue drain failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Due queue worker stopped");
    }

    /// Pop one batch of due entries and replay them
    pub async fn drain_once(&self, cancel: &CancellationToken) -> std::result::Result<DrainStats, StoreError> {
        let now_ms = self.clock.now_millis();

        let payloads = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            result = self.queue.dequeue_due(now_ms, self.config.batch_size) => result?,
        };

        let mut stats = DrainStats {
            dequeued: payloads.len(),
            ..Default::default()
        };
        if payloads.is_empty() {
            return Ok(stats);
        }
        crate::metrics::record_due_dequeued(payloads.len());

        let outcomes: Vec<Replay> = stream::iter(payloads)
            .map(|payload| self.replay(payload, cancel))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Replay::Handled => stats.handled += 1,
                Replay::Dropped => stats.dropped += 1,
                Replay::Requeued => stats.requeued += 1,
                Replay::Lost => stats.lost += 1,
            }
        }

        Ok(stats)
    }

    async fn replay(&self, payload: String, cancel: &CancellationToken) -> Replay {
        if cancel.is_cancelled() {
            let now_ms = self.clock.now_millis();
            return self.requeue(DueQueueEntry::new(payload, now_ms)).await;
        }

        let Some(url) = DuePayload::decode(&payload).into_scheduled() else {
            warn!(payload = %payload, "Dropping due-queue entry without a usable URL");
            return Replay::Dropped;
        };

        match self.handler.handle(url.clone(), cancel).await {
            Ok(_) => Replay::Handled,
            Err(e) if e.is_cancelled() => {
                let now_ms = self.clock.now_millis();
                self.requeue(DueQueueEntry::new(payload, now_ms)).await
            }
            Err(e) => {
                warn!(url = %url.url, host = %url.host, error = %e, "Replay failed, re-enqueueing");
                let retry_at = self
                    .clock
                    .now_millis()
                    .saturating_add(self.config.replay_retry_delay_ms as i64);
                self.requeue(DueQueueEntry::new(payload, retry_at)).await
            }
        }
    }

    async fn requeue(&self, entry: DueQueueEntry) -> Replay {
        match self.queue.push(&entry).await {
            Ok(()) => Replay::Requeued,
            Err(e) => {
                error!(
                    payload = %entry.payload,
                    due_at = entry.due_at,
                    error = %e,
                    "Failed to re-enqueue due-queue entry, entry lost"
                );
                crate::metrics::record_due_lost();
                Replay::Lost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::store::{ClaimOutcome, MemoryStore, RateLimitStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ScheduledUrl>>,
    }

    #[async_trait]
    impl WorkHandler for Recorder {
        async fn handle(&self, url: ScheduledUrl, _: &CancellationToken) -> Result<UrlContentMetadata> {
            self.seen.lock().await.push(url);
            Ok(UrlContentMetadata::fetched(200))
        }
    }

    struct Failing(AtomicUsize);

    #[async_trait]
    impl WorkHandler for Failing {
        async fn handle(&self, _: ScheduledUrl, _: &CancellationToken) -> Result<UrlContentMetadata> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::other("chain failed"))
        }
    }

    /// Memory store whose enqueues can be switched off after seeding
    #[derive(Default)]
    struct NoRequeueStore {
        inner: MemoryStore,
        reject_enqueue: AtomicBool,
    }

    #[async_trait]
    impl RateLimitStore for NoRequeueStore {
        async fn try_claim(
            &self,
            k: &str,
            r: &str,
            n: i64,
            d: u64,
        ) -> std::result::Result<ClaimOutcome, StoreError> {
            self.inner.try_claim(k, r, n, d).await
        }
        async fn retry_after_until(&self, k: &str) -> std::result::Result<Option<i64>, StoreError> {
            self.inner.retry_after_until(k).await
        }
        async fn set_retry_after(&self, k: &str, u: i64, n: i64) -> std::result::Result<(), StoreError> {
            self.inner.set_retry_after(k, u, n).await
        }
        async fn enqueue_due(&self, q: &str, p: &str, d: i64) -> std::result::Result<(), StoreError> {
            if self.reject_enqueue.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.enqueue_due(q, p, d).await
        }
        async fn dequeue_due(&self, q: &str, n: i64, m: usize) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.dequeue_due(q, n, m).await
        }
        async fn due_len(&self, q: &str) -> std::result::Result<u64, StoreError> {
            self.inner.due_len(q).await
        }
    }

    fn worker(handler: Arc<dyn WorkHandler>, clock: Arc<ManualClock>) -> (DueQueueWorker, DueQueue) {
        let queue = DueQueue::new(Arc::new(MemoryStore::new()), "test");
        let config = DueQueueConfig {
            replay_retry_delay_ms: 1_000,
            ..Default::default()
        };
        (DueQueueWorker::new(queue.clone(), handler, clock, config), queue)
    }

    #[tokio::test]
    async fn test_drain_replays_structured_and_bare_entries() {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(10_000));
        let (worker, queue) = worker(recorder.clone(), clock);

        let url = ScheduledUrl::new(Uuid::new_v4(), "a.com", "https://a.com/x", 3);
        queue.enqueue_url(&url, 9_000).await.unwrap();
        queue.enqueue("https://b.com/legacy", 9_500).await.unwrap();
        queue.enqueue("https://c.com/later", 20_000).await.unwrap();

        let stats = worker.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.dequeued, 2);
        assert_eq!(stats.handled, 2);

        let seen = recorder.seen.lock().await;
        assert!(seen.contains(&url));
        assert!(seen.iter().any(|u| u.host == "b.com" && u.id.is_nil()));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unusable_entry_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let (worker, queue) = worker(recorder.clone(), Arc::new(ManualClock::new(10_000)));

        queue.enqueue("not a url", 0).await.unwrap();

        let stats = worker.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert!(recorder.seen.lock().await.is_empty());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_replay_is_requeued_later() {
        let handler = Arc::new(Failing(AtomicUsize::new(0)));
        let clock = Arc::new(ManualClock::new(10_000));
        let (worker, queue) = worker(handler.clone(), clock.clone());

        queue.enqueue("https://a.com/", 5_000).await.unwrap();

        let stats = worker.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.requeued, 1);
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);

        // not due again until the retry delay elapses
        assert!(queue.dequeue_due(10_999, 10).await.unwrap().is_empty());
        assert_eq!(queue.dequeue_due(11_000, 10).await.unwrap(), vec!["https://a.com/"]);
    }

    #[tokio::test]
    async fn test_failed_requeue_is_counted_as_lost() {
        let store = Arc::new(NoRequeueStore::default());
        let queue = DueQueue::new(store.clone(), "test");
        let handler = Arc::new(Failing(AtomicUsize::new(0)));
        let worker = DueQueueWorker::new(
            queue.clone(),
            handler,
            Arc::new(ManualClock::new(10_000)),
            DueQueueConfig::default(),
        );

        queue.enqueue("https://a.com/", 5_000).await.unwrap();
        store.reject_enqueue.store(true, Ordering::SeqCst);

        let stats = worker.drain_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.requeued, 0);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_drain_keeps_entries() {
        let recorder = Arc::new(Recorder::default());
        let (worker, queue) = worker(recorder, Arc::new(ManualClock::new(10_000)));
        queue.enqueue("https://a.com/", 5_000).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(worker.drain_once(&cancel).await, Err(StoreError::Cancelled)));
        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
