//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod backoff;
pub mod error;

use anyhow::{Context, Result};
use url::Url;

/// Extract the lowercased host from a URL
pub fn extract_host(url: &str) -> Result<String> {
    let parsed = Url::parse(url).context("Invalid URL")?;

    parsed
        .host_str()
        .map(normalize_host)
        .filter(|h| !h.is_empty())
        .context("No host in URL")
}

/// Canonical form of a host name used for keying per-host state
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://News.Example.COM/article/123").unwrap(),
            "news.example.com"
        );
        assert!(extract_host("not a url").is_err());
        assert!(extract_host("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("  Example.COM. "), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
    }
}
