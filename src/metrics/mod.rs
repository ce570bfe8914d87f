//! Prometheus metrics for hostpace
//!
//! This module provides metrics tracking for:
//! - Politeness: claims allowed/denied, degraded-mode fallbacks
//! - Due queue: entries deferred and drained
//! - Crawl: robots.txt vetoes and fail-opens, fetch retries
//! - Backlog: scheduler claims, orphan recoveries
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for politeness and due-queue metrics
struct PolitenessMetrics {
    claims: CounterVec,
    degraded: Counter,
    due_enqueued: Counter,
    due_dequeued: Counter,
    due_lost: Counter,
    defer_seconds: Histogram,
}

/// Container for crawl and backlog metrics
struct CrawlMetrics {
    robots_blocked: Counter,
    robots_fail_open: Counter,
    fetch_retries: Counter,
    fetches: CounterVec,
    scheduler_claimed: Counter,
    orphans_recovered: Counter,
}

/// Global storage for politeness metrics
static POLITENESS_METRICS: OnceLock<PolitenessMetrics> = OnceLock::new();

/// Global storage for crawl metrics
static CRAWL_METRICS: OnceLock<CrawlMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, errors are logged and subsequent
/// metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = hostpace::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let mut failure = None;
    // Concurrent callers block here until the first registration finishes
    METRICS_INIT_ATTEMPTED.get_or_init(|| {
        if let Err(e) = register_all() {
            failure = Some(e);
        }
        true
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn register_all() -> Result<(), Box<dyn std::error::Error>> {
    let politeness = PolitenessMetrics {
        claims: register_counter_vec!(
            "hostpace_politeness_claims_total",
            "Rate-limit claims by result",
            &["result"]
        )?,
        degraded: register_counter!(
            "hostpace_politeness_degraded_total",
            "Claims decided by the in-process fallback because the shared store was unavailable"
        )?,
        due_enqueued: register_counter!(
            "hostpace_due_queue_enqueued_total",
            "URLs deferred into the due queue"
        )?,
        due_dequeued: register_counter!(
            "hostpace_due_queue_dequeued_total",
            "URLs drained from the due queue"
        )?,
        due_lost: register_counter!(
            "hostpace_due_queue_lost_total",
            "Drained entries whose re-enqueue failed"
        )?,
        defer_seconds: register_histogram!(
            "hostpace_politeness_defer_seconds",
            "How far into the future denied URLs were deferred",
            vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
        )?,
    };

    let crawl = CrawlMetrics {
        robots_blocked: register_counter!(
            "hostpace_robots_blocked_total",
            "URLs vetoed by robots.txt"
        )?,
        robots_fail_open: register_counter!(
            "hostpace_robots_fail_open_total",
            "robots.txt checks that failed and were treated as allowed"
        )?,
        fetch_retries: register_counter!(
            "hostpace_fetch_retries_total",
            "Fetch attempts retried after a transient failure"
        )?,
        fetches: register_counter_vec!(
            "hostpace_fetches_total",
            "Completed fetches by status class",
            &["class"]
        )?,
        scheduler_claimed: register_counter!(
            "hostpace_scheduler_claimed_total",
            "URLs moved from idle to in-flight by the scheduler"
        )?,
        orphans_recovered: register_counter!(
            "hostpace_orphans_recovered_total",
            "Stuck in-flight URLs returned to idle"
        )?,
    };

    POLITENESS_METRICS
        .set(politeness)
        .map_err(|_| "Politeness metrics already initialized")?;
    CRAWL_METRICS
        .set(crawl)
        .map_err(|_| "Crawl metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    POLITENESS_METRICS.get().is_some() && CRAWL_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the result of a rate-limit claim
pub fn record_claim(allowed: bool) {
    if let Some(m) = POLITENESS_METRICS.get() {
        let label = if allowed { "allowed" } else { "denied" };
        m.claims.with_label_values(&[label]).inc();
    }
}

/// Record a claim decided locally because the shared store was unreachable
pub fn record_degraded_claim() {
    if let Some(m) = POLITENESS_METRICS.get() {
        m.degraded.inc();
    }
}

/// Record a URL pushed into the due queue `defer_ms` into the future
pub fn record_due_enqueued(defer_ms: i64) {
    let Some(m) = POLITENESS_METRICS.get() else {
        return;
    };

    m.due_enqueued.inc();
    m.defer_seconds.observe(defer_ms.max(0) as f64 / 1000.0);
}

/// Record entries drained from the due queue
pub fn record_due_dequeued(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = POLITENESS_METRICS.get() {
        m.due_dequeued.inc_by(count as f64);
    }
}

/// Record a drained entry that could not be put back
pub fn record_due_lost() {
    if let Some(m) = POLITENESS_METRICS.get() {
        m.due_lost.inc();
    }
}

/// Record a robots.txt veto
pub fn record_robots_blocked() {
    if let Some(m) = CRAWL_METRICS.get() {
        m.robots_blocked.inc();
    }
}

/// Record a robots.txt check that failed open
pub fn record_robots_fail_open() {
    if let Some(m) = CRAWL_METRICS.get() {
        m.robots_fail_open.inc();
    }
}

/// Record a retried fetch attempt
pub fn record_fetch_retry() {
    if let Some(m) = CRAWL_METRICS.get() {
        m.fetch_retries.inc();
    }
}

/// Record a completed fetch by HTTP status class (2xx, 4xx, ...)
pub fn record_fetch(status_code: u16) {
    if let Some(m) = CRAWL_METRICS.get() {
        let class = format!("{}xx", status_code / 100);
        m.fetches.with_label_values(&[&class]).inc();
    }
}

/// Record URLs claimed by the scheduler
pub fn record_scheduler_claimed(count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = CRAWL_METRICS.get() {
        m.scheduler_claimed.inc_by(count as f64);
    }
}

/// Record URLs reset by orphan recovery
pub fn record_orphans_recovered(count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = CRAWL_METRICS.get() {
        m.orphans_recovered.inc_by(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
