//! Redis list transport
//!
//! Producers `LPUSH` the JSON payload, consumers `BRPOP` it, giving FIFO order
//! across any number of processes.

use ::redis::AsyncCommands;
use async_trait::async_trait;
use deadpool_redis::Pool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{UrlConsumer, UrlPublisher};
use crate::models::ScheduledUrl;
use crate::utils::error::TransportError;

#[derive(Clone)]
pub struct RedisListTransport {
    pool: Pool,
    key: String,
    pop_timeout: Duration,
}

impl RedisListTransport {
    /// Transport on list `key`; `pop_timeout` bounds how long a consumer
    /// takes to notice cancellation
    pub fn new(pool: Pool, key: impl Into<String>, pop_timeout: Duration) -> Self {
        Self {
            pool,
            key: key.into(),
            pop_timeout,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of URLs waiting in the list
    pub async fn len(&self) -> Result<u64, TransportError> {
        let mut conn = self.pool.get().await?;
        let len: u64 = conn.llen(&self.key).await?;
        Ok(len)
    }
}

#[async_trait]
impl UrlPublisher for RedisListTransport {
    async fn publish(&self, urls: &[ScheduledUrl]) -> Result<(), TransportError> {
        if urls.is_empty() {
            return Ok(());
        }

        let payloads = urls
            .iter()
            .map(ScheduledUrl::to_json)
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.pool.get().await?;
        let _: i64 = conn.lpush(&self.key, payloads).await?;
        Ok(())
    }
}

#[async_trait]
impl UrlConsumer for RedisListTransport {
    async fn consume(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduledUrl>, TransportError> {
        // BRPOP is never dropped mid-flight: a popped item would be lost.
        // Cancellation is observed between pops instead.
        while !cancel.is_cancelled() {
            let mut conn = self.pool.get().await?;
            let popped: Option<(String, String)> = conn
                .brpop(&self.key, self.pop_timeout.as_secs_f64())
                .await?;

            let Some((_, payload)) = popped else {
                continue;
            };

            match ScheduledUrl::from_json(&payload) {
                Ok(url) => return Ok(Some(url)),
                Err(e) => {
                    warn!(key = %self.key, error = %e, payload = %payload, "Dropping malformed work item");
                }
            }
        }
        Ok(None)
    }
}
