//! Unified error handling for the hostpace crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`HostpaceErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use hostpace::error::{Error, HostpaceErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::utils::error::{
    FetchError, RepositoryError, RobotsError, StoreError, TransportError,
};

/// Common trait for all hostpace error types
pub trait HostpaceErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, robots.txt)
    Network,
    /// Shared store and persistent store errors
    Storage,
    /// Work hand-off errors
    Transport,
    /// Configuration and validation errors
    Config,
    /// Shutdown in progress
    Cancelled,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label suitable for log fields and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Transport => "transport",
            Self::Config => "config",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the hostpace crate
#[derive(Error, Debug)]
pub enum Error {
    /// Shared rate-limit / due-queue store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Persistent URL store errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// robots.txt errors
    #[error("Robots error: {0}")]
    Robots(#[from] RobotsError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Operation aborted by cancellation
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HostpaceErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Fetch(e) => e.is_recoverable(),
            Self::Repository(e) => e.is_recoverable(),
            Self::Transport(e) => e.is_recoverable(),
            Self::Robots(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Cancelled => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(FetchError::Cancelled)
            | Self::Store(StoreError::Cancelled)
            | Self::Repository(RepositoryError::Cancelled)
            | Self::Cancelled => ErrorCategory::Cancelled,
            Self::Fetch(_) | Self::Robots(_) => ErrorCategory::Network,
            Self::Store(_) | Self::Repository(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Transport(_) | Self::Json(_) => ErrorCategory::Transport,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error only reports a shutdown in progress
    pub fn is_cancelled(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
