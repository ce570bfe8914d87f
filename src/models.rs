// Core data structures for the crawl coordination core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a discovered URL in the persistent store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    /// Not yet admitted to the backlog
    #[default]
    None,
    /// Waiting in the backlog; eligible once `next_crawl_at` passes
    Idle,
    /// Claimed by a scheduler and handed to a worker
    InFlight,
    /// Never scheduled again
    Disabled,
}

impl UrlStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Idle => "idle",
            Self::InFlight => "in_flight",
            Self::Disabled => "disabled",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "idle" => Some(Self::Idle),
            "in_flight" => Some(Self::InFlight),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// URL known to the persistent backlog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub id: Uuid,
    pub host: String,
    pub url: String,
    pub normalized_url: Option<String>,
    pub status: UrlStatus,
    pub last_crawl_at: Option<DateTime<Utc>>,
    pub next_crawl_at: Option<DateTime<Utc>>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub fail_count: i32,
    /// Higher is more urgent
    pub priority: i32,
    /// Back-reference to the most recent fetch record
    pub last_fetch_id: Option<Uuid>,
}

impl DiscoveredUrl {
    /// New idle URL, due immediately
    pub fn new(host: impl Into<String>, url: impl Into<String>, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            url: url.into(),
            normalized_url: None,
            status: UrlStatus::Idle,
            last_crawl_at: None,
            next_crawl_at: None,
            status_updated_at: Some(Utc::now()),
            fail_count: 0,
            priority,
            last_fetch_id: None,
        }
    }

    /// Build from a raw URL, deriving the host
    pub fn from_url(url: &str, priority: i32) -> Option<Self> {
        let host = crate::utils::extract_host(url).ok()?;
        Some(Self::new(host, url, priority))
    }

    /// Set when the URL becomes eligible
    pub fn with_next_crawl_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_crawl_at = Some(at);
        self
    }

    /// Project onto the wire payload
    pub fn to_scheduled(&self) -> ScheduledUrl {
        ScheduledUrl {
            id: self.id,
            host: self.host.clone(),
            url: self.url.clone(),
            priority: self.priority,
        }
    }
}

/// Unit of work carried on the transport and the due queue
///
/// Wire shape is `{"Id", "Host", "Url", "Priority"}`; lowercase names are
/// accepted when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledUrl {
    #[serde(alias = "id")]
    pub id: Uuid,
    #[serde(alias = "host")]
    pub host: String,
    #[serde(alias = "url")]
    pub url: String,
    #[serde(alias = "priority", default)]
    pub priority: i32,
}

impl ScheduledUrl {
    pub fn new(id: Uuid, host: impl Into<String>, url: impl Into<String>, priority: i32) -> Self {
        Self {
            id,
            host: host.into(),
            url: url.into(),
            priority,
        }
    }

    /// Payload recovered from a legacy bare-URL due-queue entry
    ///
    /// Carries the nil id because no backlog row is known for it.
    pub fn from_bare_url(url: &str) -> Option<Self> {
        let host = crate::utils::extract_host(url).ok()?;
        Some(Self::new(Uuid::nil(), host, url, 0))
    }

    /// Whether this payload refers to a backlog row
    pub fn has_backlog_row(&self) -> bool {
        !self.id.is_nil()
    }

    /// Serialize to the wire representation
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode the wire representation
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Per-host pacing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitEntry {
    /// Epoch millis before which the host must not be fetched again
    pub next_allowed_request: i64,
    /// Epoch millis until which the host asked us to back off
    pub retry_after_until: Option<i64>,
}

impl RateLimitEntry {
    /// Whether the host is still held back at `now_ms`
    pub fn is_live(&self, now_ms: i64) -> bool {
        self.next_allowed_request > now_ms
            || self.retry_after_until.is_some_and(|until| until > now_ms)
    }
}

/// Deferred work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueQueueEntry {
    pub payload: String,
    /// Epoch millis
    pub due_at: i64,
}

impl DueQueueEntry {
    pub fn new(payload: impl Into<String>, due_at: i64) -> Self {
        Self {
            payload: payload.into(),
            due_at,
        }
    }
}

/// Outcome of one pass through the policy chain
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlContentMetadata {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    /// HTTP status; 0 when no request was made
    pub status_code: u16,
    pub was_deferred: bool,
    pub was_blocked: bool,
}

impl UrlContentMetadata {
    /// Result for work pushed to the due queue
    pub fn deferred() -> Self {
        Self {
            was_deferred: true,
            ..Default::default()
        }
    }

    /// Result for work vetoed by robots.txt
    pub fn blocked() -> Self {
        Self {
            was_blocked: true,
            ..Default::default()
        }
    }

    /// Result for a completed HTTP exchange
    pub fn fetched(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    /// Whether a request actually went out
    pub fn was_fetched(&self) -> bool {
        !self.was_deferred && !self.was_blocked && self.status_code != 0
    }

    /// 2xx response
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// How a fetch attempt ended, as reported back to the URL store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Succeeded,
    Failed,
}
