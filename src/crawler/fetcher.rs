//! HTTP fetch action
//!
//! Issues the GET for a scheduled URL behind the policy chain. Transient
//! failures are retried with decorrelated-jitter backoff:
//! - status 408, 429, 500, 502, 503, 504
//! - connect, timeout and request errors
//!
//! Any other status ends the attempt and is reported as metadata. A 429 or 503
//! carrying a future `Retry-After` ends the retry loop with
//! [`FetchError::RetryAfter`] and is forwarded to the rate limiter so every
//! worker backs off from the host, not just this one.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::Result;
use crate::models::{ScheduledUrl, UrlContentMetadata};
use crate::policy::FetchAction;
use crate::politeness::DistributedRateLimiter;
use crate::utils::backoff::{retry_with_backoff, BackoffConfig, RetryError};
use crate::utils::error::FetchError;

/// Fetcher used as the terminal step of the policy chain
pub struct HttpFetcher {
    client: Client,
    backoff: BackoffConfig,
    limiter: Option<Arc<DistributedRateLimiter>>,
}

impl HttpFetcher {
    /// Create a fetcher from configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: &FetchConfig) -> std::result::Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .build()?;

        let backoff = BackoffConfig::new(
            config.max_retries,
            Duration::from_millis(config.backoff_median_ms),
        );
        Ok(Self::with_client(client, backoff))
    }

    /// Create a fetcher around an existing client
    pub fn with_client(client: Client, backoff: BackoffConfig) -> Self {
        Self {
            client,
            backoff,
            limiter: None,
        }
    }

    /// Forward `Retry-After` windows to `limiter`
    pub fn with_limiter(mut self, limiter: Arc<DistributedRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Fetch `url`, retrying transient failures
    ///
    /// # Errors
    ///
    /// - `FetchError::InvalidUrl` if the URL does not parse
    /// - `FetchError::RetryAfter` if the host asked for a back-off window
    /// - `FetchError::MaxRetriesExceeded` once every attempt failed transiently
    /// - `FetchError::Cancelled` if `cancel` fires first
    pub async fn fetch_url(
        &self,
        url: &ScheduledUrl,
        cancel: &CancellationToken,
    ) -> std::result::Result<UrlContentMetadata, FetchError> {
        let target = reqwest::Url::parse(&url.url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", url.url)))?;

        let delays = self.backoff.delays();
        let result = retry_with_backoff(
            &delays,
            cancel,
            |attempt| {
                let target = target.clone();
                async move {
                    debug!(url = %target, attempt, "Fetching");
                    self.attempt(url, target).await
                }
            },
            should_retry,
        )
        .await;

        match result {
            Ok(metadata) => {
                crate::metrics::record_fetch(metadata.status_code);
                Ok(metadata)
            }
            Err(RetryError::Cancelled) => Err(FetchError::Cancelled),
            Err(RetryError::Fatal(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => {
                Err(FetchError::MaxRetriesExceeded {
                    attempts,
                    last_error: last.to_string(),
                })
            }
        }
    }

    async fn attempt(
        &self,
        url: &ScheduledUrl,
        target: reqwest::Url,
    ) -> std::result::Result<UrlContentMetadata, FetchError> {
        let response = self.client.get(target).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e)
            }
        })?;

        let status = response.status();
        if is_retryable_status(status) {
            if matches!(
                status,
                StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
            ) {
                if let Some(until) = self.retry_after(url, &response) {
                    self.forward_retry_after(url, until).await;
                    return Err(FetchError::RetryAfter { until });
                }
            }
            return Err(FetchError::RetryableStatus(status.as_u16()));
        }

        read_metadata(response).await
    }

    /// Future end of the response's `Retry-After` window, if it has one
    fn retry_after(&self, url: &ScheduledUrl, response: &Response) -> Option<DateTime<Utc>> {
        let header = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())?;

        let now = self
            .limiter
            .as_ref()
            .map_or_else(Utc::now, |limiter| limiter.clock().now());
        match parse_retry_after(header, now) {
            Some(until) if until > now => Some(until),
            Some(_) => None,
            None => {
                debug!(host = %url.host, value = %header, "Ignoring unparseable Retry-After");
                None
            }
        }
    }

    async fn forward_retry_after(&self, url: &ScheduledUrl, until: DateTime<Utc>) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        if let Err(e) = limiter.record_retry_after(&url.host, until).await {
            warn!(host = %url.host, error = %e, "Failed to record Retry-After");
        }
    }
}

#[async_trait]
impl FetchAction for HttpFetcher {
    async fn fetch(
        &self,
        url: &ScheduledUrl,
        cancel: &CancellationToken,
    ) -> Result<UrlContentMetadata> {
        Ok(self.fetch_url(url, cancel).await?)
    }
}

async fn read_metadata(
    response: Response,
) -> std::result::Result<UrlContentMetadata, FetchError> {
    let status_code = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.bytes().await?;

    Ok(UrlContentMetadata {
        content_type,
        content_length: Some(body.len() as u64),
        status_code,
        was_deferred: false,
        was_blocked: false,
    })
}

/// Statuses worth another attempt
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

fn should_retry(err: &FetchError) -> bool {
    match err {
        FetchError::RetryableStatus(_) | FetchError::Timeout => true,
        FetchError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
        _ => false,
    }
}

/// Parse a `Retry-After` value: delay in seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        let secs = i64::try_from(secs).ok()?;
        return now.checked_add_signed(ChronoDuration::try_seconds(secs)?);
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
