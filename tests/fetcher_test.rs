//! Integration tests for HttpFetcher using wiremock
//!
//! These tests validate retry classification, Retry-After forwarding and the
//! metadata reported for completed exchanges.

use hostpace::clock::ManualClock;
use hostpace::config::PolitenessConfig;
use hostpace::crawler::HttpFetcher;
use hostpace::models::ScheduledUrl;
use hostpace::politeness::{retry_after_key, DistributedRateLimiter};
use hostpace::store::{MemoryStore, RateLimitStore};
use hostpace::utils::backoff::BackoffConfig;
use hostpace::utils::error::FetchError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW_MS: i64 = 1_700_000_000_000;

fn fetcher(max_retries: u32) -> HttpFetcher {
    HttpFetcher::with_client(
        reqwest::Client::new(),
        BackoffConfig::new(max_retries, Duration::from_millis(2)),
    )
}

fn target(server: &MockServer, route: &str) -> ScheduledUrl {
    ScheduledUrl::new(
        Uuid::new_v4(),
        "127.0.0.1",
        format!("{}{route}", server.uri()),
        0,
    )
}

/// Test successful fetch from mock server
#[tokio::test]
async fn test_fetch_success_reports_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html>hello</html>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let metadata = fetcher(3)
        .fetch_url(&target(&server, "/page"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(metadata.status_code, 200);
    assert_eq!(metadata.content_type.as_deref(), Some("text/html; charset=utf-8"));
    assert_eq!(metadata.content_length, Some(18));
    assert!(metadata.was_fetched());
}

/// Test that server errors trigger retries
#[tokio::test]
async fn test_server_error_retried_until_success() {
    let server = MockServer::start().await;

    // Return 500 twice, then succeed
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let metadata = fetcher(3)
        .fetch_url(&target(&server, "/flaky"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(metadata.status_code, 200);
}

/// Client errors are an outcome of the attempt, not a reason to retry
#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = fetcher(3)
        .fetch_url(&target(&server, "/missing"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(metadata.status_code, 404);
    assert!(!metadata.is_success());
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let result = fetcher(2)
        .fetch_url(&target(&server, "/down"), &CancellationToken::new())
        .await;

    match result {
        Err(FetchError::MaxRetriesExceeded { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"));
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_request_timeout_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(2)
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let fetcher =
        HttpFetcher::with_client(client, BackoffConfig::new(1, Duration::from_millis(2)));

    let result = fetcher
        .fetch_url(&target(&server, "/slow"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(FetchError::MaxRetriesExceeded { attempts: 2, .. })));
}

fn limiter_at(store: Arc<MemoryStore>, now_ms: i64) -> Arc<DistributedRateLimiter> {
    Arc::new(DistributedRateLimiter::new(
        store,
        Arc::new(ManualClock::new(now_ms)),
        PolitenessConfig::default(),
        "test",
    ))
}

#[tokio::test]
async fn test_retry_after_forwarded_to_limiter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let limiter = limiter_at(store.clone(), NOW_MS);
    let fetcher = fetcher(0).with_limiter(limiter.clone());

    let result = fetcher
        .fetch_url(&target(&server, "/busy"), &CancellationToken::new())
        .await;
    match result {
        Err(FetchError::RetryAfter { until }) => {
            assert_eq!(until.timestamp_millis(), NOW_MS + 120_000);
        }
        other => panic!("expected RetryAfter, got {other:?}"),
    }

    let key = retry_after_key(&limiter.host_key("127.0.0.1"));
    assert_eq!(
        store.retry_after_until(&key).await.unwrap(),
        Some(NOW_MS + 120_000)
    );
}

/// A host that asked for a back-off window is not hit again by the retry loop
#[tokio::test]
async fn test_retry_after_window_stops_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let limiter = limiter_at(Arc::new(MemoryStore::new()), NOW_MS);
    let fetcher = fetcher(3).with_limiter(limiter);

    let result = fetcher
        .fetch_url(&target(&server, "/busy"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(FetchError::RetryAfter { .. })));
}

#[tokio::test]
async fn test_retry_after_respected_without_limiter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let result = fetcher(3)
        .fetch_url(&target(&server, "/busy"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(FetchError::RetryAfter { .. })));
}

/// A zero-length window is an ordinary retryable status
#[tokio::test]
async fn test_elapsed_retry_after_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blip"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blip"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let metadata = fetcher(3)
        .fetch_url(&target(&server, "/blip"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(metadata.status_code, 200);
}

#[tokio::test]
async fn test_cancelled_fetch_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = fetcher(3).fetch_url(&target(&server, "/page"), &cancel).await;
    assert!(matches!(result, Err(FetchError::Cancelled)));
}
