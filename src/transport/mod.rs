//! Work hand-off between the scheduler and crawl workers
//!
//! The scheduler publishes claimed URLs, workers consume them one at a time.
//! Two transports are provided:
//!
//! - [`ChannelTransport`] - tokio mpsc, for a scheduler and workers in one process
//! - [`RedisListTransport`] - `LPUSH` / `BRPOP` on a Redis list, shared by processes

pub mod redis;

pub use self::redis::RedisListTransport;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::models::ScheduledUrl;
use crate::utils::error::TransportError;

/// Sending side of the transport
#[async_trait]
pub trait UrlPublisher: Send + Sync {
    /// Hand off a batch, in order
    async fn publish(&self, urls: &[ScheduledUrl]) -> Result<(), TransportError>;
}

/// Receiving side of the transport
#[async_trait]
pub trait UrlConsumer: Send + Sync {
    /// Wait for the next unit of work
    ///
    /// Returns `None` once `cancel` fires or the transport has closed.
    async fn consume(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduledUrl>, TransportError>;
}

/// Redis list key for a queue name
pub fn transport_key(prefix: &str, queue_name: &str) -> String {
    format!("{prefix}:{queue_name}")
}

/// In-process transport over a bounded tokio channel
///
/// Clones share the same channel. Publishing waits while the channel is full.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<ScheduledUrl>,
    rx: Arc<Mutex<mpsc::Receiver<ScheduledUrl>>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

#[async_trait]
impl UrlPublisher for ChannelTransport {
    async fn publish(&self, urls: &[ScheduledUrl]) -> Result<(), TransportError> {
        for url in urls {
            self.tx
                .send(url.clone())
                .await
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl UrlConsumer for ChannelTransport {
    async fn consume(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ScheduledUrl>, TransportError> {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            rx = self.rx.lock() => rx,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            url = rx.recv() => Ok(url),
        }
    }
}
