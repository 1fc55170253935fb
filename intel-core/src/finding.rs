//! Findings, feed items and threat labels

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Indicators grouped by kind (`ipv4`, `sha256`, `domain`, `email`)
pub type IocMap = BTreeMap<String, Vec<String>>;

/// Severity classes produced by the classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreatLabel {
    /// Nothing security relevant
    Benign,
    /// Advisories, phishing and vulnerability reports
    ThreatAdvisory,
    /// Content carrying operational indicators (C2, hashes, payloads)
    Indicator,
}

impl ThreatLabel {
    /// All labels ordered by code
    pub const ALL: [ThreatLabel; 3] = [
        ThreatLabel::Benign,
        ThreatLabel::ThreatAdvisory,
        ThreatLabel::Indicator,
    ];

    pub fn code(self) -> u32 {
        match self {
            Self::Benign => 0,
            Self::ThreatAdvisory => 1,
            Self::Indicator => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::ThreatAdvisory => "threat-advisory",
            Self::Indicator => "indicator",
        }
    }
}

/// Display name for a raw label code
pub fn label_name(code: u32) -> &'static str {
    ThreatLabel::from_code(code)
        .map(ThreatLabel::name)
        .unwrap_or("unknown")
}

/// A persisted classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Row id assigned by the store (`None` until persisted)
    pub id: Option<i64>,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    /// Page the text came from; `None` for direct text classification
    pub source_url: Option<String>,
    pub label: u32,
    pub label_name: String,
    pub probabilities: Vec<f64>,
    pub iocs: IocMap,
    /// Risk in [0, 1]
    pub risk: f64,
}

impl Finding {
    /// New unpersisted finding stamped with the current time
    pub fn new(label: u32, probabilities: Vec<f64>, risk: f64) -> Self {
        Self {
            id: None,
            timestamp: chrono::Utc::now().timestamp(),
            source_url: None,
            label,
            label_name: label_name(label).to_string(),
            probabilities,
            iocs: IocMap::new(),
            risk: risk.clamp(0.0, 1.0),
        }
    }

    pub fn with_source(mut self, url: &str) -> Self {
        self.source_url = Some(url.to_string());
        self
    }

    pub fn with_iocs(mut self, iocs: IocMap) -> Self {
        self.iocs = iocs;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One entry pulled from a feed (never persisted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    /// Stable hash of `link`, used for in-batch dedup
    pub link_hash: String,
}

impl FeedItem {
    pub fn new(title: &str, link: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            link: link.trim().to_string(),
            link_hash: hash_link(link.trim()),
        }
    }
}

/// Hex SHA-256 of a link
pub fn hash_link(link: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    format!("{:x}", hasher.finalize())
}
