//! Redis-backed rate-limit store
//!
//! The pacing claim and the due-queue dequeue each run as a single Lua script
//! so that concurrent processes observe them as one step.

use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};

use super::{ClaimOutcome, RateLimitStore, PACING_TTL_SLACK_MS};
use crate::config::RedisConfig;
use crate::utils::error::StoreError;

/// Claim the pacing slot unless a Retry-After window is open or the stored
/// timestamp has not passed yet.
///
/// KEYS[1] pacing key; KEYS[2] Retry-After key; ARGV[1] now (ms);
/// ARGV[2] delay (ms); ARGV[3] ttl (ms). Returns `{allowed, next_allowed}`.
const CLAIM_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local delay = tonumber(ARGV[2])
local hold = tonumber(redis.call('GET', KEYS[2]) or '')
if hold and hold > now then
    return {0, hold}
end
local current = redis.call('GET', KEYS[1])
if current then
    local stored = tonumber(current)
    if stored and stored > now then
        return {0, stored}
    end
end
local next_allowed = now + delay
redis.call('SET', KEYS[1], next_allowed, 'PX', tonumber(ARGV[3]))
return {1, next_allowed}
"#;

/// Pop up to ARGV[2] members with score <= ARGV[1], lowest score first.
const DEQUEUE_SCRIPT: &str = r#"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
if #items > 0 then
    redis.call('ZREM', KEYS[1], unpack(items))
end
return items
"#;

/// Shared store over a deadpool-redis pool
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    claim_script: Script,
    dequeue_script: Script,
}

impl RedisStore {
    /// Create a store and verify the connection with PING
    pub async fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let store = Self::lazy(config)?;

        let mut conn = store.pool.get().await?;
        let _: String = ::redis::cmd("PING").query_async(&mut *conn).await?;

        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(store)
    }

    /// Create a store without touching the network
    ///
    /// Connection failures surface on first use as unavailable errors.
    pub fn lazy(config: &RedisConfig) -> Result<Self, StoreError> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Pool(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Pool(format!("Failed to create Redis pool: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Create a store, falling back to a lazily-connected one if Redis is down
    pub async fn try_new(config: &RedisConfig) -> Result<Self, StoreError> {
        match Self::new(config).await {
            Ok(store) => Ok(store),
            Err(e) if e.is_unavailable() => {
                tracing::warn!(error = %e, "Redis unavailable at startup, will retry per call");
                Self::lazy(config)
            }
            Err(e) => Err(e),
        }
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            claim_script: Script::new(CLAIM_SCRIPT),
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
        }
    }

    /// Underlying connection pool, shared with the Redis transport
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Check if the store answers PING
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let result: String = ::redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn try_claim(
        &self,
        key: &str,
        retry_key: &str,
        now_ms: i64,
        delay_ms: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut conn = self.pool.get().await?;
        let ttl_ms = delay_ms.saturating_add(PACING_TTL_SLACK_MS);

        let (allowed, next_allowed): (i64, i64) = self
            .claim_script
            .key(key)
            .key(retry_key)
            .arg(now_ms)
            .arg(delay_ms)
            .arg(ttl_ms)
            .invoke_async(&mut *conn)
            .await?;

        Ok(ClaimOutcome {
            allowed: allowed == 1,
            next_allowed,
        })
    }

    async fn retry_after_until(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.pool.get().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_retry_after(
        &self,
        key: &str,
        until_ms: i64,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let remaining = until_ms.saturating_sub(now_ms);
        if remaining <= 0 {
            return Ok(());
        }

        let mut conn = self.pool.get().await?;
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(until_ms)
            .arg("PX")
            .arg(remaining)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn enqueue_due(
        &self,
        queue: &str,
        payload: &str,
        due_at_ms: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = ::redis::cmd("ZADD")
            .arg(queue)
            .arg(due_at_ms)
            .arg(payload)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn dequeue_due(
        &self,
        queue: &str,
        now_ms: i64,
        max_count: usize,
    ) -> Result<Vec<String>, StoreError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.get().await?;
        let items: Vec<String> = self
            .dequeue_script
            .key(queue)
            .arg(now_ms)
            .arg(max_count)
            .invoke_async(&mut *conn)
            .await?;
        Ok(items)
    }

    async fn due_len(&self, queue: &str) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;
        let len: u64 = conn.zcard(queue).await?;
        Ok(len)
    }
}
