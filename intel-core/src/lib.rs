//! Intel Guard Core - domain model for guarded OSINT classification
//!
//! This crate provides the foundational primitives:
//! - Layered runtime configuration (defaults < file < environment)
//! - Findings, feed items and threat labels
//! - Indicator of compromise (IOC) extraction
//! - Risk scoring

pub mod config;
pub mod finding;
pub mod iocs;
pub mod risk;

pub use config::*;
pub use finding::*;
pub use iocs::*;
pub use risk::*;

/// Fixed identifying user agent for every outbound request
pub const DEFAULT_USER_AGENT: &str = "AgentZeroIntel/1.0";

/// Default timeout for content and robots.txt fetches, in seconds
pub const DEFAULT_FETCH_TIMEOUT_SECS: f64 = 15.0;

/// Default per-domain cooldown between fetches, in seconds
pub const DEFAULT_FETCH_COOLDOWN_SECS: f64 = 5.0;

/// Default minimum risk that triggers an alert
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;

/// Default persistence location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://intel.sqlite3";
