//! robots.txt compliance
//!
//! [`HttpRobotsChecker`] downloads `/robots.txt` once per origin and user
//! agent, keeps the parsed rules for a configurable TTL and answers
//! `is_allowed` from the cache. A robots.txt that answers 4xx allows
//! everything; server errors and transport failures are reported to the caller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use texting_robots::{get_robots_url, Robot};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::utils::error::RobotsError;

/// Expired entries are swept once the cache reaches this many origins
const DEFAULT_PRUNE_THRESHOLD: usize = 10_000;

/// Decides whether a URL may be fetched under robots.txt
#[async_trait]
pub trait RobotsCompliance: Send + Sync {
    async fn is_allowed(&self, url: &str, user_agent: &str) -> Result<bool, RobotsError>;
}

/// Parsed rules, or `None` when the site has no robots.txt
#[derive(Clone)]
struct CachedRobots {
    robot: Option<Arc<Robot>>,
    fetched_at: Instant,
}

/// robots.txt checker over HTTP with a per-origin cache
pub struct HttpRobotsChecker {
    client: reqwest::Client,
    ttl: Duration,
    prune_threshold: usize,
    cache: RwLock<HashMap<String, CachedRobots>>,
}

impl HttpRobotsChecker {
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sweep expired entries once the cache holds `threshold` origins
    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold.max(1);
        self
    }

    /// Number of cached robots.txt entries
    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn rules_for(
        &self,
        robots_url: &str,
        user_agent: &str,
    ) -> Result<Option<Arc<Robot>>, RobotsError> {
        let cache_key = format!("{user_agent}\n{robots_url}");

        if let Some(entry) = self.cache.read().await.get(&cache_key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.robot.clone());
            }
        }

        let robot = self.download(robots_url, user_agent).await?;

        let mut cache = self.cache.write().await;
        if cache.len() >= self.prune_threshold {
            let ttl = self.ttl;
            cache.retain(|_, entry| entry.fetched_at.elapsed() < ttl);
        }
        cache.insert(
            cache_key,
            CachedRobots {
                robot: robot.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(robot)
    }

    async fn download(
        &self,
        robots_url: &str,
        user_agent: &str,
    ) -> Result<Option<Arc<Robot>>, RobotsError> {
        let response = self
            .client
            .get(robots_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            debug!(robots_url = %robots_url, status = status.as_u16(), "No robots.txt, allowing all");
            return Ok(None);
        }
        let response = response.error_for_status()?;

        let body = response.bytes().await?;
        let robot = Robot::new(user_agent, &body).map_err(|e| RobotsError::Parse(e.to_string()))?;

        debug!(robots_url = %robots_url, "Fetched robots.txt");
        Ok(Some(Arc::new(robot)))
    }
}

#[async_trait]
impl RobotsCompliance for HttpRobotsChecker {
    async fn is_allowed(&self, url: &str, user_agent: &str) -> Result<bool, RobotsError> {
        let robots_url = get_robots_url(url).map_err(|e| RobotsError::InvalidUrl(e.to_string()))?;

        Ok(match self.rules_for(&robots_url, user_agent).await? {
            Some(robot) => robot.allowed(url),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AGENT: &str = "hostpace-test";

    fn checker(ttl: Duration) -> HttpRobotsChecker {
        HttpRobotsChecker::new(reqwest::Client::new(), ttl)
    }

    #[tokio::test]
    async fn test_disallowed_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
            )
            .mount(&server)
            .await;

        let checker = checker(Duration::from_secs(60));
        let base = server.uri();

        assert!(checker.is_allowed(&format!("{base}/public"), AGENT).await.unwrap());
        assert!(!checker.is_allowed(&format!("{base}/private/page"), AGENT).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let checker = checker(Duration::from_secs(60));
        assert!(checker
            .is_allowed(&format!("{}/anything", server.uri()), AGENT)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let checker = checker(Duration::from_secs(60));
        let result = checker.is_allowed(&format!("{}/page", server.uri()), AGENT).await;
        assert!(matches!(result, Err(RobotsError::Http(_))));
        assert_eq!(checker.cached_entries().await, 0);
    }

    #[tokio::test]
    async fn test_rules_are_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
            .expect(1)
            .mount(&server)
            .await;

        let checker = checker(Duration::from_secs(60));
        for page in ["a", "b", "c"] {
            let url = format!("{}/{page}", server.uri());
            assert!(checker.is_allowed(&url, AGENT).await.unwrap());
        }
        assert_eq!(checker.cached_entries().await, 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_pruned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /\n"))
            .mount(&server)
            .await;

        // zero TTL: every cached entry is already stale
        let checker = checker(Duration::ZERO).with_prune_threshold(2);
        let url = format!("{}/page", server.uri());
        for agent in ["agent-a", "agent-b", "agent-c", "agent-d"] {
            assert!(checker.is_allowed(&url, agent).await.unwrap());
            assert!(checker.cached_entries().await <= 2);
        }
    }
}
