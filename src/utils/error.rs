//! Error types for the crawl coordination core
//!
//! This module defines the domain errors raised by the stores, the fetcher and
//! the collaborator adapters. They are unified in [`crate::error::Error`].

use thiserror::Error;

/// Errors raised by the shared rate-limit / due-queue store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis command or script failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Could not obtain a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Store refused or is not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Operation aborted by cancellation
    #[error("Store operation cancelled")]
    Cancelled,
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl StoreError {
    /// Whether the failure means "the store is not reachable right now"
    ///
    /// Connection-level failures qualify; script or data errors do not.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Pool(_) | Self::Unavailable(_) => true,
            Self::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            Self::Serialization(_) | Self::Cancelled => false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.is_unavailable()
    }
}

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server signalled overload with a retryable status
    #[error("Retryable status: {0}")]
    RetryableStatus(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Host asked us to stay away until the given time
    #[error("Host asked to retry after {until}")]
    RetryAfter { until: chrono::DateTime<chrono::Utc> },

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation aborted by cancellation
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::RetryableStatus(_)
                | Self::Timeout
                | Self::RetryAfter { .. }
                | Self::MaxRetriesExceeded { .. }
        )
    }
}

/// Errors raised by the persistent URL store
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// PostgreSQL error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Could not obtain a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// A stored row could not be mapped onto the model
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// Operation aborted by cancellation
    #[error("Repository operation cancelled")]
    Cancelled,
}

impl From<deadpool_postgres::PoolError> for RepositoryError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl RepositoryError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Postgres(_) | Self::Pool(_))
    }
}

/// Errors raised by the message transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The other end of the channel is gone
    #[error("Transport closed")]
    Closed,

    /// Redis command failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Could not obtain a pooled connection
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<deadpool_redis::PoolError> for TransportError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

impl TransportError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Pool(_))
    }
}

/// Errors raised while evaluating robots.txt
#[derive(Error, Debug)]
pub enum RobotsError {
    /// robots.txt could not be downloaded
    #[error("Failed to fetch robots.txt: {0}")]
    Http(#[from] reqwest::Error),

    /// robots.txt could not be parsed
    #[error("Failed to parse robots.txt: {0}")]
    Parse(String),

    /// URL has no robots.txt location
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl RobotsError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}
