//! Per-host politeness
//!
//! Pacing state is keyed by host. Keys live under the configured prefix so
//! several deployments can share one Redis.

pub mod limiter;

pub use limiter::DistributedRateLimiter;

/// Pacing key for `host`: `"{prefix}:ratelimit:{host}"`
///
/// The host is trimmed and ASCII-lowercased; nothing else is normalized.
pub fn host_key(prefix: &str, host: &str) -> String {
    format!("{prefix}:ratelimit:{}", host.trim().to_ascii_lowercase())
}

/// Retry-After key paired with a pacing key
pub fn retry_after_key(host_key: &str) -> String {
    format!("{host_key}:retry_after")
}

/// Sorted-set key holding deferred work
pub fn due_queue_key(prefix: &str) -> String {
    format!("{prefix}:due")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_normalizes_case_and_whitespace() {
        assert_eq!(
            host_key("hostpace", "  News.Example.COM "),
            "hostpace:ratelimit:news.example.com"
        );
        assert_eq!(
            host_key("hostpace", "example.com"),
            host_key("hostpace", "EXAMPLE.com")
        );
    }

    #[test]
    fn test_distinct_hosts_get_distinct_keys() {
        assert_ne!(
            host_key("hostpace", "a.example.com"),
            host_key("hostpace", "b.example.com")
        );
    }

    #[test]
    fn test_derived_keys() {
        let key = host_key("p", "example.com");
        assert_eq!(retry_after_key(&key), "p:ratelimit:example.com:retry_after");
        assert_eq!(due_queue_key("p"), "p:due");
    }
}
