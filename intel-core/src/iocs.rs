//! Indicator of compromise (IOC) extraction
//!
//! Supports extraction of:
//! - IPv4 addresses
//! - SHA256 hashes
//! - Domain names
//! - Email addresses
//!
//! Kinds are matched independently, so one token may appear under several
//! kinds (the domain part of an email address is also a domain).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::IocMap;

/// Categories of extracted indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocKind {
    /// Four dot-separated groups of 1-3 digits
    Ipv4,
    /// Exactly 64 hex characters as a whole token
    Sha256,
    /// Lowercase host name ending in an alphabetic label
    Domain,
    /// local@domain
    Email,
}

impl IocKind {
    pub const ALL: [IocKind; 4] = [IocKind::Ipv4, IocKind::Sha256, IocKind::Domain, IocKind::Email];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Sha256 => "sha256",
            Self::Domain => "domain",
            Self::Email => "email",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Self::Ipv4 => &*IPV4_REGEX,
            Self::Sha256 => &*SHA256_REGEX,
            Self::Domain => &*DOMAIN_REGEX,
            Self::Email => &*EMAIL_REGEX,
        }
    }
}

static IPV4_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").unwrap()
});

static SHA256_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap()
});

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z0-9.-]+\.[a-z]{2,}\b").unwrap()
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

/// Sorted, de-duplicated matches of one kind
pub fn extract_kind(text: &str, kind: IocKind) -> Vec<String> {
    kind.pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Extract every indicator kind; all kinds are present in the result
pub fn extract_iocs(text: &str) -> IocMap {
    IocKind::ALL
        .into_iter()
        .map(|kind| (kind.as_str().to_string(), extract_kind(text, kind)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_extract_mixed_indicators() {
        let text = format!("contact a@b.com from 10.0.0.1 hash {}", HASH);
        let iocs = extract_iocs(&text);

        assert_eq!(iocs["email"], vec!["a@b.com"]);
        assert_eq!(iocs["ipv4"], vec!["10.0.0.1"]);
        assert_eq!(iocs["sha256"], vec![HASH]);
        assert!(iocs["domain"].contains(&"b.com".to_string()));
    }

    #[test]
    fn test_short_hex_is_not_sha256() {
        let text = format!("token {}", &HASH[..63]);
        assert!(extract_kind(&text, IocKind::Sha256).is_empty());
    }

    #[test]
    fn test_long_hex_is_not_sha256() {
        let text = format!("token {}a", HASH);
        assert!(extract_kind(&text, IocKind::Sha256).is_empty());
    }

    #[test]
    fn test_results_sorted_and_deduplicated() {
        let text = "10.0.0.2 then 10.0.0.1 and again 10.0.0.2";
        assert_eq!(extract_kind(text, IocKind::Ipv4), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_domain_requires_lowercase_alpha_tld() {
        let domains = extract_kind("visit evil-site.example.org or 1.2.3.4 or EXAMPLE.COM", IocKind::Domain);
        assert_eq!(domains, vec!["evil-site.example.org"]);
    }

    #[test]
    fn test_all_kinds_present_on_empty_text() {
        let iocs = extract_iocs("");
        assert_eq!(iocs.len(), 4);
        assert!(iocs.values().all(Vec::is_empty));
    }
}
