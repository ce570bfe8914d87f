//! In-process URL repository
//!
//! Holds every row behind one lock, which makes claims trivially exclusive.
//! Used by tests and single-node runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{claim_order, RepositoryResult, UrlRepository};
use crate::models::{DiscoveredUrl, FetchOutcome, UrlStatus};

#[derive(Default)]
pub struct MemoryUrlRepository {
    rows: Mutex<HashMap<Uuid, DiscoveredUrl>>,
}

impl MemoryUrlRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row as-is
    pub async fn put(&self, url: DiscoveredUrl) {
        self.rows.lock().await.insert(url.id, url);
    }

    /// Rows currently in `status`
    pub async fn count_with_status(&self, status: UrlStatus) -> usize {
        self.rows
            .lock()
            .await
            .values()
            .filter(|u| u.status == status)
            .count()
    }
}

fn is_due(url: &DiscoveredUrl, now: DateTime<Utc>) -> bool {
    url.status == UrlStatus::Idle && url.next_crawl_at.map_or(true, |at| at <= now)
}

#[async_trait]
impl UrlRepository for MemoryUrlRepository {
    async fn claim_idle_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<DiscoveredUrl>> {
        let mut rows = self.rows.lock().await;

        let mut due: Vec<&DiscoveredUrl> = rows.values().filter(|u| is_due(u, now)).collect();
        due.sort_by(|a, b| claim_order(a, b));
        let ids: Vec<Uuid> = due.iter().take(limit).map(|u| u.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = rows.get_mut(&id) {
                row.status = UrlStatus::InFlight;
                row.status_updated_at = Some(now);
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn find_stuck_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Uuid>> {
        let rows = self.rows.lock().await;
        let mut stuck: Vec<&DiscoveredUrl> = rows
            .values()
            .filter(|u| u.status == UrlStatus::InFlight)
            .filter(|u| u.status_updated_at.map_or(true, |at| at <= older_than))
            .collect();
        stuck.sort_by_key(|u| u.status_updated_at);
        Ok(stuck.into_iter().take(limit).map(|u| u.id).collect())
    }

    async fn reset_to_idle(
        &self,
        ids: &[Uuid],
        next_crawl_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<u64> {
        let mut rows = self.rows.lock().await;
        let mut changed = 0;
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if row.status == UrlStatus::InFlight {
                    row.status = UrlStatus::Idle;
                    row.next_crawl_at = Some(next_crawl_at);
                    row.status_updated_at = Some(now);
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn upsert_discovered(&self, url: &DiscoveredUrl) -> RepositoryResult<bool> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&url.id) || rows.values().any(|u| u.url == url.url) {
            return Ok(false);
        }
        rows.insert(url.id, url.clone());
        Ok(true)
    }

    async fn mark_fetch_completed(
        &self,
        id: Uuid,
        outcome: FetchOutcome,
        next_crawl_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id).filter(|r| r.status == UrlStatus::InFlight) else {
            return Ok(false);
        };

        row.status = UrlStatus::Idle;
        row.status_updated_at = Some(now);
        row.last_crawl_at = Some(now);
        row.next_crawl_at = Some(next_crawl_at);
        match outcome {
            FetchOutcome::Succeeded => row.fail_count = 0,
            FetchOutcome::Failed => row.fail_count += 1,
        }
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<DiscoveredUrl>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }
}
