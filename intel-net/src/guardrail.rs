//! Guardrail policy
//!
//! Every remote fetch must pass, in this order:
//! 1. the global fetch toggle
//! 2. a parseable http(s) URL with a host
//! 3. the domain allowlist
//! 4. the per-domain rate limit
//! 5. robots.txt
//!
//! Local checks run first so robots.txt is only requested for URLs that are
//! otherwise permitted. Each approval leaves one audit entry.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Url};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use intel_core::IntelConfig;

use crate::{RateLimiter, RobotsGate};

/// Audit entries retained in memory
pub const AUDIT_CAPACITY: usize = 1024;

/// Refusals raised before any content is fetched
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    #[error("Remote fetching disabled via INTEL_ALLOW_REMOTE_FETCH")]
    FetchDisabled,

    #[error("Unable to determine domain from URL: {0}")]
    MissingDomain(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Domain '{0}' not in INTEL_ALLOWLIST")]
    DomainNotAllowed(String),

    #[error("Rate limit exceeded for domain {domain}, retry in {retry_after:?}")]
    RateLimited { domain: String, retry_after: Duration },

    #[error("Fetch of {0} blocked by robots.txt policy")]
    RobotsDisallowed(String),
}

impl GuardError {
    pub fn is_permission(&self) -> bool {
        !self.is_rate_limit()
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GuardError::RateLimited { .. })
    }
}

/// Record of one approved fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub domain: String,
    pub user: String,
    pub justification: String,
}

/// Composition of allowlist, rate limiter and robots gate
pub struct GuardrailPolicy {
    config: Arc<IntelConfig>,
    limiter: RateLimiter,
    robots: RobotsGate,
    audit: Mutex<VecDeque<AuditEntry>>,
}

impl GuardrailPolicy {
    pub fn new(config: Arc<IntelConfig>, client: Client) -> Self {
        Self {
            limiter: RateLimiter::new(config.fetch_cooldown),
            robots: RobotsGate::new(client, config.robots_policy),
            config,
            audit: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &IntelConfig {
        &self.config
    }

    /// Toggle, URL shape and allowlist checks only.
    ///
    /// Returns the parsed URL and its lowercased host.
    pub fn check_domain(&self, url: &str) -> Result<(Url, String), GuardError> {
        if !self.config.allow_remote_fetch {
            return Err(GuardError::FetchDisabled);
        }

        let parsed =
            Url::parse(url.trim()).map_err(|_| GuardError::MissingDomain(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GuardError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let domain = parsed
            .host_str()
            .map(|h| h.trim_matches(|c| c == '[' || c == ']').to_lowercase())
            .unwrap_or_default();
        if domain.is_empty() {
            return Err(GuardError::MissingDomain(url.to_string()));
        }

        if !self.config.is_domain_allowed(&domain) {
            return Err(GuardError::DomainNotAllowed(domain));
        }

        Ok((parsed, domain))
    }

    /// Run every guardrail for `url`; on success the fetch is approved and audited
    pub async fn enforce(
        &self,
        url: &str,
        user: Option<&str>,
        justification: Option<&str>,
    ) -> Result<Url, GuardError> {
        let (parsed, domain) = self.check_domain(url)?;

        self.limiter.check_and_mark(&domain)?;

        if !self.robots.can_fetch(&self.config.user_agent, &parsed).await {
            debug!("robots.txt refused {}", parsed);
            return Err(GuardError::RobotsDisallowed(parsed.to_string()));
        }

        let entry = AuditEntry {
            timestamp: Utc::now(),
            url: parsed.to_string(),
            domain,
            user: user.unwrap_or("unknown").to_string(),
            justification: justification.unwrap_or("unspecified").to_string(),
        };
        info!(
            url = %entry.url,
            domain = %entry.domain,
            user = %entry.user,
            justification = %entry.justification,
            "intel fetch approved"
        );
        self.record(entry);

        Ok(parsed)
    }

    /// Approved fetches, oldest first
    pub fn recent_audit(&self) -> Vec<AuditEntry> {
        self.audit.lock().iter().cloned().collect()
    }

    fn record(&self, entry: AuditEntry) {
        let mut audit = self.audit.lock();
        if audit.len() == AUDIT_CAPACITY {
            audit.pop_front();
        }
        audit.push_back(entry);
    }
}
