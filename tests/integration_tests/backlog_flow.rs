//! Backlog admission, crawling and crashed-worker repair

use crate::common::Harness;
use hostpace::clock::Clock;
use hostpace::config::{DueQueueConfig, RecoveryConfig, SchedulerConfig};
use hostpace::due_queue::DueQueueWorker;
use hostpace::models::{DiscoveredUrl, UrlStatus};
use hostpace::recovery::OrphanRecovery;
use hostpace::scheduler::Scheduler;
use hostpace::storage::UrlRepository;
use hostpace::transport::ChannelTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NOW_MS: i64 = 1_700_000_000_000;
const MINUTE_MS: i64 = 60_000;

async fn seed(h: &Harness, urls: &[&str]) {
    for url in urls {
        h.repo.put(DiscoveredUrl::from_url(url, 0).unwrap()).await;
    }
}

#[tokio::test]
async fn test_scheduled_urls_are_crawled_and_returned_to_idle() {
    let h = Harness::new(NOW_MS, 1_000);
    seed(
        &h,
        &[
            "https://a.example.com/",
            "https://b.example.com/",
            "https://c.example.com/",
        ],
    )
    .await;

    let transport = ChannelTransport::new(16);
    let scheduler = Scheduler::new(
        h.repo.clone(),
        Arc::new(transport.clone()),
        h.clock.clone(),
        SchedulerConfig::default(),
    );
    let cancel = CancellationToken::new();
    assert_eq!(scheduler.run_once(&cancel).await.unwrap(), 3);
    assert_eq!(h.repo.count_with_status(UrlStatus::InFlight).await, 3);

    let worker = tokio::spawn(h.worker.clone().run(Arc::new(transport), cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.repo.count_with_status(UrlStatus::Idle).await < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker did not finish the batch");

    cancel.cancel();
    worker.await.unwrap();

    assert_eq!(h.fetch.count(), 3);
    // Nothing is due again until the recrawl interval passes
    assert_eq!(scheduler.run_once(&CancellationToken::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_same_host_backlog_is_paced() {
    let h = Harness::new(NOW_MS, 1_000);
    seed(&h, &["https://example.com/1", "https://example.com/2"]).await;
    let cancel = CancellationToken::new();

    let claimed = h.repo.claim_idle_due(h.clock.now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 2);

    let mut deferred = 0;
    for row in &claimed {
        if h.worker.crawl(&row.to_scheduled(), &cancel).await.unwrap().was_deferred {
            deferred += 1;
        }
    }
    assert_eq!(deferred, 1);
    assert_eq!(h.fetch.count(), 1);
    assert_eq!(h.repo.count_with_status(UrlStatus::InFlight).await, 1);

    let drainer = DueQueueWorker::new(
        h.due_queue.clone(),
        h.worker.clone(),
        h.clock.clone(),
        DueQueueConfig::default(),
    );
    h.clock.advance_millis(1_000);
    assert_eq!(drainer.drain_once(&cancel).await.unwrap().handled, 1);

    assert_eq!(h.fetch.count(), 2);
    assert_eq!(h.repo.count_with_status(UrlStatus::Idle).await, 2);
}

#[tokio::test]
async fn test_crashed_worker_url_is_recovered() {
    let h = Harness::new(NOW_MS, 1_000);
    seed(&h, &["https://example.com/lost"]).await;

    let scheduler = Scheduler::new(
        h.repo.clone(),
        Arc::new(ChannelTransport::new(4)),
        h.clock.clone(),
        SchedulerConfig::default(),
    );
    let recovery = OrphanRecovery::new(h.repo.clone(), h.clock.clone(), RecoveryConfig::default());

    // Claimed, then the worker holding it dies
    let lost = scheduler.claim_ready_urls(10).await.unwrap();
    assert_eq!(lost.len(), 1);

    h.clock.advance_millis(MINUTE_MS);
    assert_eq!(recovery.sweep_once().await.unwrap(), 0);

    h.clock.advance_millis(30 * MINUTE_MS);
    assert_eq!(recovery.sweep_once().await.unwrap(), 1);

    let row = h.repo.get(lost[0].id).await.unwrap().unwrap();
    assert_eq!(row.status, UrlStatus::Idle);
    assert_eq!(row.next_crawl_at, Some(h.clock.now() + chrono::Duration::seconds(60)));

    assert!(scheduler.claim_ready_urls(10).await.unwrap().is_empty());
    h.clock.advance_millis(MINUTE_MS);
    assert_eq!(scheduler.claim_ready_urls(10).await.unwrap(), lost);
}
