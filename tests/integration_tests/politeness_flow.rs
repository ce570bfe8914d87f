//! Per-host pacing through the full policy chain

use crate::common::{Harness, PREFIX};
use futures::future::join_all;
use hostpace::clock::{millis_to_datetime, Clock};
use hostpace::config::DueQueueConfig;
use hostpace::due_queue::{DuePayload, DueQueueWorker};
use hostpace::models::{DiscoveredUrl, ScheduledUrl, UrlStatus};
use hostpace::politeness::host_key;
use hostpace::storage::UrlRepository;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Put a row in the backlog and claim it, as the scheduler would
async fn claimed(h: &Harness, url: &str) -> ScheduledUrl {
    let row = DiscoveredUrl::from_url(url, 0).unwrap();
    h.repo.put(row).await;
    let mut claimed = h.repo.claim_idle_due(h.clock.now(), 1).await.unwrap();
    claimed.pop().unwrap().to_scheduled()
}

#[tokio::test]
async fn test_busy_host_defers_until_due() {
    let h = Harness::new(1_000, 500);
    let cancel = CancellationToken::new();
    let key = host_key(PREFIX, "example.com");
    h.store.set_pacing_value(&key, 5_000).await;

    let claim = h
        .limiter
        .try_claim_next_crawl(&key, 1_000, 500, &cancel)
        .await
        .unwrap();
    assert!(!claim.allowed);
    assert_eq!(claim.next_allowed, 5_000);

    let url = claimed(&h, "https://example.com/a").await;
    let metadata = h.worker.crawl(&url, &cancel).await.unwrap();

    assert!(metadata.was_deferred);
    assert_eq!(h.fetch.count(), 0);
    assert_eq!(h.repo.count_with_status(UrlStatus::InFlight).await, 1);

    assert!(h.due_queue.dequeue_due(4_999, 10).await.unwrap().is_empty());
    let due = h.due_queue.dequeue_due(5_000, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(DuePayload::decode(&due[0]).into_scheduled(), Some(url));
}

#[tokio::test]
async fn test_deferred_url_replayed_exactly_once() {
    let h = Harness::new(1_000, 500);
    let cancel = CancellationToken::new();
    h.store
        .set_pacing_value(&host_key(PREFIX, "example.com"), 5_000)
        .await;

    let url = claimed(&h, "https://example.com/a").await;
    assert!(h.worker.crawl(&url, &cancel).await.unwrap().was_deferred);

    let drainer = DueQueueWorker::new(
        h.due_queue.clone(),
        h.worker.clone(),
        h.clock.clone(),
        DueQueueConfig::default(),
    );

    h.clock.set_millis(4_999);
    assert_eq!(drainer.drain_once(&cancel).await.unwrap().dequeued, 0);

    h.clock.set_millis(5_000);
    let stats = drainer.drain_once(&cancel).await.unwrap();
    assert_eq!(stats.handled, 1);
    assert_eq!(h.fetch.count(), 1);

    let again = drainer.drain_once(&cancel).await.unwrap();
    assert_eq!(again.dequeued, 0);
    assert_eq!(h.fetch.count(), 1);

    let row = h.repo.get(url.id).await.unwrap().unwrap();
    assert_eq!(row.status, UrlStatus::Idle);
    assert_eq!(row.last_crawl_at, Some(millis_to_datetime(5_000)));
    assert!(row.next_crawl_at.unwrap() > millis_to_datetime(5_000));
}

#[tokio::test]
async fn test_concurrent_claims_single_winner() {
    let h = Harness::new(10_000, 1_000);
    let key = host_key(PREFIX, "example.com");
    let cancel = CancellationToken::new();

    let claims = join_all((0..16).map(|_| {
        let limiter = Arc::clone(&h.limiter);
        let key = key.clone();
        let cancel = cancel.clone();
        async move {
            limiter
                .try_claim_next_crawl(&key, 10_000, 1_000, &cancel)
                .await
                .unwrap()
        }
    }))
    .await;

    assert_eq!(claims.iter().filter(|c| c.allowed).count(), 1);
    assert!(claims.iter().all(|c| c.next_allowed == 11_000));
}

#[tokio::test]
async fn test_retry_after_outranks_pacing() {
    let h = Harness::new(1_000, 500);
    let cancel = CancellationToken::new();
    h.limiter
        .record_retry_after("example.com", millis_to_datetime(61_000))
        .await
        .unwrap();

    let url = claimed(&h, "https://example.com/a").await;
    assert!(h.worker.crawl(&url, &cancel).await.unwrap().was_deferred);

    // The pacing key is left alone while the host asked us to back off
    assert_eq!(h.store.pacing_value(&host_key(PREFIX, "example.com")).await, None);
    assert!(h.due_queue.dequeue_due(60_999, 10).await.unwrap().is_empty());
    assert_eq!(h.due_queue.dequeue_due(61_000, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_hosts_are_paced_independently() {
    let h = Harness::new(1_000, 500);
    let cancel = CancellationToken::new();

    let a = claimed(&h, "https://a.example.com/").await;
    let b = claimed(&h, "https://b.example.com/").await;
    let a_again = claimed(&h, "https://a.example.com/other").await;

    assert!(h.worker.crawl(&a, &cancel).await.unwrap().was_fetched());
    assert!(h.worker.crawl(&b, &cancel).await.unwrap().was_fetched());
    assert!(h.worker.crawl(&a_again, &cancel).await.unwrap().was_deferred);

    assert_eq!(h.fetch.count(), 2);
    assert_eq!(h.due_queue.len().await.unwrap(), 1);
}
