//! PostgreSQL URL repository
//!
//! Claims run in one transaction: select due idle rows `FOR UPDATE SKIP LOCKED`
//! and flip them to in-flight before commit, so concurrent schedulers skip
//! each other's rows instead of waiting on them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::{claim_order, RepositoryResult, UrlRepository};
use crate::config::DatabaseConfig;
use crate::models::{DiscoveredUrl, FetchOutcome, UrlStatus};
use crate::utils::error::RepositoryError;

const URL_COLUMNS: &str = "id, host, url, normalized_url, status, last_crawl_at, next_crawl_at, \
                           status_updated_at, fail_count, priority, last_fetch_id";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS discovered_urls (
    id UUID PRIMARY KEY,
    host TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    normalized_url TEXT,
    status TEXT NOT NULL DEFAULT 'idle'
        CHECK (status IN ('none', 'idle', 'in_flight', 'disabled')),
    last_crawl_at TIMESTAMPTZ,
    next_crawl_at TIMESTAMPTZ,
    status_updated_at TIMESTAMPTZ,
    fail_count INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    last_fetch_id UUID
);

CREATE INDEX IF NOT EXISTS idx_discovered_urls_idle_due
    ON discovered_urls (priority DESC, next_crawl_at ASC NULLS FIRST)
    WHERE status = 'idle';

CREATE INDEX IF NOT EXISTS idx_discovered_urls_in_flight
    ON discovered_urls (status_updated_at)
    WHERE status = 'in_flight';

CREATE INDEX IF NOT EXISTS idx_discovered_urls_host
    ON discovered_urls (host);
"#;

/// [`UrlRepository`] over a deadpool-postgres pool
#[derive(Clone)]
pub struct PostgresUrlRepository {
    pool: Pool,
}

impl PostgresUrlRepository {
    /// Create a repository and verify the connection
    pub async fn new(config: &DatabaseConfig) -> RepositoryResult<Self> {
        let mut pool_config = PgConfig::new();
        pool_config.url = Some(config.postgres_url.clone());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RepositoryError::Pool(format!("Failed to create PostgreSQL pool: {e}")))?;

        let client = pool.get().await?;
        client.simple_query("SELECT 1").await?;

        tracing::info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the `discovered_urls` table and its indexes
    pub async fn migrate(&self) -> RepositoryResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;

        tracing::info!("URL store schema initialized");
        Ok(())
    }
}

fn row_to_url(row: &Row) -> RepositoryResult<DiscoveredUrl> {
    let status: String = row.try_get("status")?;
    let status = UrlStatus::parse(&status)
        .ok_or_else(|| RepositoryError::InvalidRow(format!("unknown status '{status}'")))?;

    Ok(DiscoveredUrl {
        id: row.try_get("id")?,
        host: row.try_get("host")?,
        url: row.try_get("url")?,
        normalized_url: row.try_get("normalized_url")?,
        status,
        last_crawl_at: row.try_get("last_crawl_at")?,
        next_crawl_at: row.try_get("next_crawl_at")?,
        status_updated_at: row.try_get("status_updated_at")?,
        fail_count: row.try_get("fail_count")?,
        priority: row.try_get("priority")?,
        last_fetch_id: row.try_get("last_fetch_id")?,
    })
}

#[async_trait]
impl UrlRepository for PostgresUrlRepository {
    async fn claim_idle_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<DiscoveredUrl>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let query = format!(
            r#"
            WITH due AS (
                SELECT id
                FROM discovered_urls
                WHERE status = 'idle'
                  AND (next_crawl_at IS NULL OR next_crawl_at <= $1)
                ORDER BY priority DESC, next_crawl_at ASC NULLS FIRST
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE discovered_urls u
            SET status = 'in_flight', status_updated_at = $1
            FROM due
            WHERE u.id = due.id
            RETURNING {}
            "#,
            URL_COLUMNS
                .split(", ")
                .map(|c| format!("u.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = tx.query(query.as_str(), &[&now, &(limit as i64)]).await?;
        tx.commit().await?;

        let mut urls = rows.iter().map(row_to_url).collect::<RepositoryResult<Vec<_>>>()?;
        // RETURNING does not preserve the CTE order
        urls.sort_by(claim_order);
        Ok(urls)
    }

    async fn find_stuck_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id
                FROM discovered_urls
                WHERE status = 'in_flight'
                  AND (status_updated_at IS NULL OR status_updated_at <= $1)
                ORDER BY status_updated_at ASC NULLS FIRST
                LIMIT $2
                "#,
                &[&older_than, &(limit as i64)],
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<_, Uuid>("id").map_err(RepositoryError::from))
            .collect()
    }

    async fn reset_to_idle(
        &self,
        ids: &[Uuid],
        next_crawl_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let client = self.pool.get().await?;
        let changed = client
            .execute(
                r#"
                UPDATE discovered_urls
                SET status = 'idle', next_crawl_at = $2, status_updated_at = $3
                WHERE id = ANY($1) AND status = 'in_flight'
                "#,
                &[&ids, &next_crawl_at, &now],
            )
            .await?;
        Ok(changed)
    }

    async fn upsert_discovered(&self, url: &DiscoveredUrl) -> RepositoryResult<bool> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                r#"
                INSERT INTO discovered_urls
                    (id, host, url, normalized_url, status, last_crawl_at, next_crawl_at,
                     status_updated_at, fail_count, priority, last_fetch_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (url) DO NOTHING
                "#,
                &[
                    &url.id,
                    &url.host,
                    &url.url,
                    &url.normalized_url,
                    &url.status.as_str(),
                    &url.last_crawl_at,
                    &url.next_crawl_at,
                    &url.status_updated_at,
                    &url.fail_count,
                    &url.priority,
                    &url.last_fetch_id,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn mark_fetch_completed(
        &self,
        id: Uuid,
        outcome: FetchOutcome,
        next_crawl_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let succeeded = outcome == FetchOutcome::Succeeded;
        let client = self.pool.get().await?;
        let changed = client
            .execute(
                r#"
                UPDATE discovered_urls
                SET status = 'idle',
                    status_updated_at = $4,
                    last_crawl_at = $4,
                    next_crawl_at = $3,
                    fail_count = CASE WHEN $2 THEN 0 ELSE fail_count + 1 END
                WHERE id = $1 AND status = 'in_flight'
                "#,
                &[&id, &succeeded, &next_crawl_at, &now],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<Option<DiscoveredUrl>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {URL_COLUMNS} FROM discovered_urls WHERE id = $1");
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        row.as_ref().map(row_to_url).transpose()
    }
}
