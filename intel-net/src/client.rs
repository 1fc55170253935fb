//! HTTP client construction
//!
//! One client is built per service and shared by content, robots.txt, feed
//! and alert requests so they all carry the same user agent and timeout.

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use intel_core::IntelConfig;

use crate::GuardError;

/// Errors from guarded network operations
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl NetError {
    /// Map a transport error, separating timeouts from other failures
    pub fn from_request(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            NetError::Timeout(timeout)
        } else {
            NetError::Request(err)
        }
    }

    /// Allowlist, toggle or robots.txt refusal
    pub fn is_permission(&self) -> bool {
        matches!(self, NetError::Guard(e) if e.is_permission())
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, NetError::Guard(e) if e.is_rate_limit())
    }
}

/// Create the shared HTTP client for a configuration
pub fn create_client(config: &IntelConfig) -> Result<Client, NetError> {
    Client::builder()
        .timeout(config.fetch_timeout)
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| NetError::ClientBuild(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_from_default_config() {
        assert!(create_client(&IntelConfig::default()).is_ok());
    }

    #[test]
    fn test_error_classification() {
        let denied = NetError::Guard(GuardError::FetchDisabled);
        assert!(denied.is_permission());
        assert!(!denied.is_rate_limit());

        let limited = NetError::Guard(GuardError::RateLimited {
            domain: "example.com".to_string(),
            retry_after: Duration::from_secs(1),
        });
        assert!(limited.is_rate_limit());
        assert!(!limited.is_permission());

        let status = NetError::Status {
            url: "https://example.com".to_string(),
            status: 500,
        };
        assert!(!status.is_permission());
        assert_eq!(status.to_string(), "https://example.com returned HTTP 500");
    }
}
