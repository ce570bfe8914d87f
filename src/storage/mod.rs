//! Persistent URL store
//!
//! The backlog of discovered URLs and their lifecycle state. This module
//! defines the [`UrlRepository`] contract used by the scheduler, the crawl
//! worker and orphan recovery, with two implementations:
//!
//! - [`PostgresUrlRepository`] - shared store; claims use `FOR UPDATE SKIP LOCKED`
//! - [`MemoryUrlRepository`] - single-process store for tests and local runs

pub mod memory;
pub mod postgres;

pub use memory::MemoryUrlRepository;
pub use postgres::PostgresUrlRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::{DiscoveredUrl, FetchOutcome};
use crate::utils::error::RepositoryError;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Backlog operations shared by every process
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Move up to `limit` idle, due URLs to in-flight and return them
    ///
    /// Due means `next_crawl_at` is null or not after `now`. Rows come back by
    /// priority descending, then `next_crawl_at` ascending with nulls first.
    /// Concurrent callers never receive the same row.
    async fn claim_idle_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<DiscoveredUrl>>;

    /// Ids of in-flight URLs whose status has not changed since `older_than`
    async fn find_stuck_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Uuid>>;

    /// Return in-flight URLs to idle, due again at `next_crawl_at`
    ///
    /// Rows that already left the in-flight state are skipped. Returns the
    /// number of rows changed.
    async fn reset_to_idle(
        &self,
        ids: &[Uuid],
        next_crawl_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<u64>;

    /// Insert a newly discovered URL; returns false if the URL is already known
    async fn upsert_discovered(&self, url: &DiscoveredUrl) -> RepositoryResult<bool>;

    /// Record the end of a fetch and return the URL to idle
    ///
    /// Only an in-flight row is updated. Returns false for a stale completion:
    /// the row is gone or recovery already handed it back to the backlog.
    async fn mark_fetch_completed(
        &self,
        id: Uuid,
        outcome: FetchOutcome,
        next_crawl_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Look up one URL
    async fn get(&self, id: Uuid) -> RepositoryResult<Option<DiscoveredUrl>>;
}

/// Claim order: priority descending, then `next_crawl_at` ascending, nulls first
pub fn claim_order(a: &DiscoveredUrl, b: &DiscoveredUrl) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.next_crawl_at, b.next_crawl_at) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
}
