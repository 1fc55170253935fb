//! Layered runtime configuration
//!
//! Configuration is resolved once per process from three layers, each
//! overriding the previous one:
//! - built-in defaults
//! - an optional TOML file (`INTEL_CONFIG_PATH`, default `conf/intel.toml`)
//! - environment variables
//!
//! Malformed values never abort startup: they are logged and the safe value
//! is used instead. Reloading means building a new [`IntelConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    DEFAULT_ALERT_THRESHOLD, DEFAULT_DATABASE_URL, DEFAULT_FETCH_COOLDOWN_SECS,
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};

/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "INTEL_CONFIG_PATH";
pub const ENV_ALLOW_REMOTE_FETCH: &str = "INTEL_ALLOW_REMOTE_FETCH";
pub const ENV_ALLOWLIST: &str = "INTEL_ALLOWLIST";
pub const ENV_USER_AGENT: &str = "INTEL_USER_AGENT";
pub const ENV_FETCH_TIMEOUT: &str = "INTEL_FETCH_TIMEOUT";
pub const ENV_FETCH_COOLDOWN: &str = "INTEL_FETCH_COOLDOWN";
pub const ENV_ROBOTS_POLICY: &str = "INTEL_ROBOTS_POLICY";
pub const ENV_ALERT_THRESHOLD: &str = "INTEL_ALERT_THRESHOLD";
pub const ENV_ALERT_WEBHOOK: &str = "SLACK_WEBHOOK_URL";
pub const ENV_DATABASE_URL: &str = "INTEL_DB_URL";

/// Config file used when `INTEL_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "conf/intel.toml";

/// Allowlist substituted whenever the merged allowlist is empty
pub const LOOPBACK_ALLOWLIST: &[&str] = &["localhost", "127.0.0.1"];

/// Errors reading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What to do when robots.txt cannot be retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsFailurePolicy {
    /// Permit the fetch when robots.txt is unreachable
    #[default]
    FailOpen,
    /// Refuse the fetch when robots.txt is unreachable
    FailClosed,
}

impl RobotsFailurePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Some(Self::FailOpen),
            "fail_closed" | "closed" => Some(Self::FailClosed),
            _ => None,
        }
    }

    /// Decision applied to an unreachable robots.txt
    pub fn permits_unreachable(self) -> bool {
        matches!(self, Self::FailOpen)
    }
}

/// Immutable, fully resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct IntelConfig {
    /// Global toggle for any remote fetch
    pub allow_remote_fetch: bool,
    allowlist: BTreeSet<String>,
    /// User agent sent with every request and matched against robots.txt
    pub user_agent: String,
    /// Timeout for each outbound fetch
    pub fetch_timeout: Duration,
    /// Minimum interval between two fetches to the same domain
    pub fetch_cooldown: Duration,
    /// Decision for origins whose robots.txt is unreachable
    pub robots_policy: RobotsFailurePolicy,
    /// Minimum risk that triggers an alert
    pub alert_threshold: f64,
    /// Optional webhook receiving alerts
    pub alert_webhook: Option<String>,
    /// sqlx connection URL of the findings database
    pub database_url: String,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self::merge(&[])
    }
}

impl IntelConfig {
    /// Build a configuration with the given fetch policy and defaults elsewhere.
    ///
    /// An empty allowlist is replaced by the loopback-only default.
    pub fn new<I, S>(allow_remote_fetch: bool, allowlist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let layer = ConfigLayer {
            allow_remote_fetch: Some(allow_remote_fetch),
            allowlist: Some(normalize_allowlist(allowlist)),
            ..Default::default()
        };
        Self::merge(&[layer])
    }

    /// Resolve configuration from the config file and the process environment
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Like [`IntelConfig::load`] with an explicit config file path
    pub fn load_from(path: &Path) -> Self {
        let env = ConfigLayer::from_env();
        let file = match ConfigLayer::from_file(path) {
            Ok(layer) => layer,
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                None
            }
        };

        let layers: Vec<ConfigLayer> = file.into_iter().chain(std::iter::once(env)).collect();
        Self::merge(&layers)
    }

    /// Merge layers over the defaults; later layers win.
    pub fn merge(layers: &[ConfigLayer]) -> Self {
        let mut merged = ConfigLayer::default();
        for layer in layers {
            merged = merged.overlay(layer.clone());
        }

        let mut allowlist = merged.allowlist.unwrap_or_default();
        if allowlist.is_empty() {
            debug!("Allowlist empty, substituting loopback-only default");
            allowlist = LOOPBACK_ALLOWLIST.iter().map(|s| s.to_string()).collect();
        }

        Self {
            allow_remote_fetch: merged.allow_remote_fetch.unwrap_or(false),
            allowlist,
            user_agent: merged
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            fetch_timeout: merged
                .fetch_timeout
                .unwrap_or(Duration::from_secs_f64(DEFAULT_FETCH_TIMEOUT_SECS)),
            fetch_cooldown: merged
                .fetch_cooldown
                .unwrap_or(Duration::from_secs_f64(DEFAULT_FETCH_COOLDOWN_SECS)),
            robots_policy: merged.robots_policy.unwrap_or_default(),
            alert_threshold: merged.alert_threshold.unwrap_or(DEFAULT_ALERT_THRESHOLD),
            alert_webhook: merged.alert_webhook,
            database_url: merged
                .database_url
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        }
    }

    /// Effective allowlist (never empty)
    pub fn allowlist(&self) -> &BTreeSet<String> {
        &self.allowlist
    }

    /// Whether `domain` matches an exact entry, a `.suffix` of an entry, or `*`
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            return false;
        }
        if self.allowlist.contains("*") || self.allowlist.contains(&domain) {
            return true;
        }
        self.allowlist
            .iter()
            .any(|entry| domain.ends_with(&format!(".{}", entry)))
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.fetch_cooldown = cooldown;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_robots_policy(mut self, policy: RobotsFailurePolicy) -> Self {
        self.robots_policy = policy;
        self
    }

    pub fn with_alert_webhook(mut self, webhook: &str, threshold: f64) -> Self {
        self.alert_webhook = Some(webhook.to_string());
        self.alert_threshold = threshold;
        self
    }
}

/// One partially specified configuration source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub allow_remote_fetch: Option<bool>,
    pub allowlist: Option<BTreeSet<String>>,
    pub user_agent: Option<String>,
    pub fetch_timeout: Option<Duration>,
    pub fetch_cooldown: Option<Duration>,
    pub robots_policy: Option<RobotsFailurePolicy>,
    pub alert_threshold: Option<f64>,
    pub alert_webhook: Option<String>,
    pub database_url: Option<String>,
}

impl ConfigLayer {
    /// Values set in `other` replace values in `self`
    fn overlay(self, other: ConfigLayer) -> Self {
        Self {
            allow_remote_fetch: other.allow_remote_fetch.or(self.allow_remote_fetch),
            allowlist: other.allowlist.or(self.allowlist),
            user_agent: other.user_agent.or(self.user_agent),
            fetch_timeout: other.fetch_timeout.or(self.fetch_timeout),
            fetch_cooldown: other.fetch_cooldown.or(self.fetch_cooldown),
            robots_policy: other.robots_policy.or(self.robots_policy),
            alert_threshold: other.alert_threshold.or(self.alert_threshold),
            alert_webhook: other.alert_webhook.or(self.alert_webhook),
            database_url: other.database_url.or(self.database_url),
        }
    }

    /// Read a TOML file; a missing file yields `Ok(None)`
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.is_file() {
            debug!("No config file at {}", path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map(Some)
    }

    /// Parse TOML with keys under `[intel]` or at the top level
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let root: toml::Table = content.parse()?;
        let section = match root.get("intel").and_then(|v| v.as_table()).cloned() {
            Some(table) => table,
            None => root,
        };

        let mut layer = Self::default();
        for (key, value) in &section {
            match key.as_str() {
                "allow_remote_fetch" => {
                    layer.allow_remote_fetch = match value {
                        toml::Value::Boolean(b) => Some(*b),
                        toml::Value::String(s) => Some(parse_toggle(key, s)),
                        other => {
                            warn!("Config key {} has unsupported value {}, disabling", key, other);
                            Some(false)
                        }
                    }
                }
                "allowlist" => {
                    layer.allowlist = match value {
                        toml::Value::String(s) => Some(normalize_allowlist(s.split(','))),
                        toml::Value::Array(items) => Some(normalize_allowlist(
                            items.iter().filter_map(|item| item.as_str()),
                        )),
                        other => {
                            warn!("Config key allowlist has unsupported value {}", other);
                            None
                        }
                    }
                }
                "user_agent" => layer.user_agent = toml_string(key, value),
                "fetch_timeout" => layer.fetch_timeout = toml_seconds(key, value),
                "fetch_cooldown" => layer.fetch_cooldown = toml_seconds(key, value),
                "robots_policy" => {
                    layer.robots_policy = toml_string(key, value)
                        .and_then(|s| parse_robots_policy(key, &s))
                }
                "alert_threshold" => {
                    layer.alert_threshold = toml_number(key, value).and_then(|t| check_threshold(key, t))
                }
                "alert_webhook" => layer.alert_webhook = toml_string(key, value),
                "database_url" => layer.database_url = toml_string(key, value),
                _ => debug!("Ignoring unknown config key {}", key),
            }
        }
        Ok(layer)
    }

    /// Layer built from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Layer built from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            allow_remote_fetch: lookup(ENV_ALLOW_REMOTE_FETCH)
                .map(|v| parse_toggle(ENV_ALLOW_REMOTE_FETCH, &v)),
            allowlist: get(ENV_ALLOWLIST).map(|v| normalize_allowlist(v.split(','))),
            user_agent: get(ENV_USER_AGENT).map(|v| v.trim().to_string()),
            fetch_timeout: get(ENV_FETCH_TIMEOUT).and_then(|v| parse_seconds(ENV_FETCH_TIMEOUT, &v)),
            fetch_cooldown: get(ENV_FETCH_COOLDOWN)
                .and_then(|v| parse_seconds(ENV_FETCH_COOLDOWN, &v)),
            robots_policy: get(ENV_ROBOTS_POLICY)
                .and_then(|v| parse_robots_policy(ENV_ROBOTS_POLICY, &v)),
            alert_threshold: get(ENV_ALERT_THRESHOLD).and_then(|v| match v.trim().parse::<f64>() {
                Ok(t) => check_threshold(ENV_ALERT_THRESHOLD, t),
                Err(_) => {
                    warn!("{} is not a number: {:?}", ENV_ALERT_THRESHOLD, v);
                    None
                }
            }),
            alert_webhook: get(ENV_ALERT_WEBHOOK).map(|v| v.trim().to_string()),
            database_url: get(ENV_DATABASE_URL).map(|v| v.trim().to_string()),
        }
    }
}

/// Lowercase, trim and drop empty entries
pub fn normalize_allowlist<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|item| item.as_ref().trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Truthy strings enable; anything else disables
fn parse_toggle(key: &str, value: &str) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        other => {
            warn!("{} has unrecognized value {:?}, disabling", key, other);
            false
        }
    }
}

fn parse_seconds(key: &str, value: &str) -> Option<Duration> {
    match value.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
        _ => {
            warn!("{} is not a valid number of seconds: {:?}", key, value);
            None
        }
    }
}

fn parse_robots_policy(key: &str, value: &str) -> Option<RobotsFailurePolicy> {
    let policy = RobotsFailurePolicy::parse(value);
    if policy.is_none() {
        warn!("{} has unrecognized value {:?}", key, value);
    }
    policy
}

fn check_threshold(key: &str, threshold: f64) -> Option<f64> {
    if threshold.is_finite() {
        Some(threshold)
    } else {
        warn!("{} must be finite", key);
        None
    }
}

fn toml_string(key: &str, value: &toml::Value) -> Option<String> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(_) => None,
        None => {
            warn!("Config key {} must be a string", key);
            None
        }
    }
}

fn toml_number(key: &str, value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Float(f) => Some(*f),
        toml::Value::Integer(i) => Some(*i as f64),
        toml::Value::String(s) => s.trim().parse().ok().or_else(|| {
            warn!("Config key {} is not a number: {:?}", key, s);
            None
        }),
        _ => {
            warn!("Config key {} must be a number", key);
            None
        }
    }
}

fn toml_seconds(key: &str, value: &toml::Value) -> Option<Duration> {
    toml_number(key, value).and_then(|secs| parse_seconds(key, &secs.to_string()))
}
