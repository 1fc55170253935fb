//! Feed sources
//!
//! Pulls candidate links from RSS 2.0 and Atom documents. Parsing is
//! deliberately shallow: only `item`/`entry` blocks and their `title` and
//! `link` are read.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{GuardrailPolicy, NetError};

/// A raw feed entry; either field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
}

impl FeedEntry {
    pub fn new(title: &str, link: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            link: Some(link.to_string()),
        }
    }
}

/// Anything that can list candidate links
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable identifier for logs
    fn name(&self) -> &str;

    /// Up to `limit` entries, in feed order
    async fn entries(&self, limit: usize) -> Result<Vec<FeedEntry>, NetError>;
}

/// Feed backed by a remote RSS/Atom document
pub struct HttpFeed {
    url: String,
    client: Client,
    guard: Arc<GuardrailPolicy>,
    timeout: Duration,
}

impl HttpFeed {
    pub fn new(url: &str, client: Client, guard: Arc<GuardrailPolicy>) -> Self {
        let timeout = guard.config().fetch_timeout;
        Self {
            url: url.to_string(),
            client,
            guard,
            timeout,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn entries(&self, limit: usize) -> Result<Vec<FeedEntry>, NetError> {
        // Feed pulls honour the toggle and allowlist; links inside get full guardrails
        let (url, _) = self.guard.check_domain(&self.url)?;

        debug!("Pulling feed: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| NetError::from_request(e, self.timeout))?;

        if !response.status().is_success() {
            warn!("Feed {} returned status: {}", url, response.status());
            return Err(NetError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| NetError::from_request(e, self.timeout))?;

        let mut entries = parse_feed(&body);
        entries.truncate(limit);
        debug!("Feed {} returned {} entries", url, entries.len());
        Ok(entries)
    }
}

/// Feed with a fixed list of entries
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    name: String,
    entries: Vec<FeedEntry>,
}

impl StaticFeed {
    pub fn new(name: &str, entries: Vec<FeedEntry>) -> Self {
        Self {
            name: name.to_string(),
            entries,
        }
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn entries(&self, limit: usize) -> Result<Vec<FeedEntry>, NetError> {
        Ok(self.entries.iter().take(limit).cloned().collect())
    }
}

static ENTRY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:item|entry)\b[^>]*>(.*?)</(?:item|entry)\s*>").unwrap()
});

static TITLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").unwrap()
});

static LINK_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<link\b([^>]*?)(/?)>").unwrap()
});

static HREF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*["']([^"']+)["']"#).unwrap()
});

static REL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\brel\s*=\s*["']([^"']+)["']"#).unwrap()
});

static CDATA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap()
});

/// Parse RSS `<item>` and Atom `<entry>` blocks
pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    ENTRY_REGEX
        .captures_iter(xml)
        .map(|cap| {
            let block = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            FeedEntry {
                title: TITLE_REGEX
                    .captures(block)
                    .and_then(|c| c.get(1))
                    .map(|m| decode_text(m.as_str()))
                    .filter(|t| !t.is_empty()),
                link: extract_link(block),
            }
        })
        .collect()
}

/// RSS `<link>text</link>` or Atom `<link href="..."/>` (alternate preferred)
fn extract_link(block: &str) -> Option<String> {
    let mut fallback = None;

    for cap in LINK_TAG_REGEX.captures_iter(block) {
        let attrs = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let self_closing = cap.get(2).is_some_and(|m| !m.as_str().is_empty());

        if let Some(href) = HREF_REGEX.captures(attrs).and_then(|c| c.get(1)) {
            let rel = REL_REGEX
                .captures(attrs)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_lowercase());
            let href = decode_text(href.as_str());
            match rel.as_deref() {
                None | Some("alternate") => return Some(href),
                _ => {
                    fallback.get_or_insert(href);
                }
            }
            continue;
        }

        if self_closing {
            continue;
        }

        let end = cap.get(0).map(|m| m.end()).unwrap_or(0);
        if let Some(close) = block[end..].find("</link") {
            let text = decode_text(&block[end..end + close]);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    fallback
}

/// Unwrap CDATA, decode the basic XML entities and trim
fn decode_text(raw: &str) -> String {
    let unwrapped = CDATA_REGEX.replace_all(raw, "$1");
    unwrapped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_core::IntelConfig;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Advisories</title>
  <link>https://feeds.example/</link>
  <item>
    <title>Botnet takedown</title>
    <link>https://feeds.example/a?x=1&amp;y=2</link>
  </item>
  <item>
    <title><![CDATA[Phishing <b>wave</b>]]></title>
    <link> https://feeds.example/b </link>
  </item>
  <item>
    <title>No link here</title>
  </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom feed</title>
  <entry>
    <title>Entry one</title>
    <link rel="self" href="https://atom.example/self/1"/>
    <link rel="alternate" href="https://atom.example/1"/>
  </entry>
  <entry>
    <title type="text">Entry two</title>
    <link href="https://atom.example/2" />
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let entries = parse_feed(RSS);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title.as_deref(), Some("Botnet takedown"));
        assert_eq!(entries[0].link.as_deref(), Some("https://feeds.example/a?x=1&y=2"));
        assert_eq!(entries[1].title.as_deref(), Some("Phishing <b>wave</b>"));
        assert_eq!(entries[1].link.as_deref(), Some("https://feeds.example/b"));
        assert_eq!(entries[2].link, None);
    }

    #[test]
    fn test_parse_atom() {
        let entries = parse_feed(ATOM);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].link.as_deref(), Some("https://atom.example/1"));
        assert_eq!(entries[1].title.as_deref(), Some("Entry two"));
        assert_eq!(entries[1].link.as_deref(), Some("https://atom.example/2"));
    }

    #[tokio::test]
    async fn test_static_feed_respects_limit() {
        let feed = StaticFeed::new(
            "static",
            vec![
                FeedEntry::new("a", "https://a.example"),
                FeedEntry::new("b", "https://b.example"),
            ],
        );
        assert_eq!(feed.entries(1).await.unwrap().len(), 1);
        assert_eq!(feed.name(), "static");
    }

    #[tokio::test]
    async fn test_http_feed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/feed.xml")
            .with_status(200)
            .with_header("content-type", "application/rss+xml")
            .with_body(RSS)
            .create_async()
            .await;

        let config = IntelConfig::new(true, ["127.0.0.1"]);
        let client = crate::create_client(&config).unwrap();
        let guard = Arc::new(GuardrailPolicy::new(Arc::new(config), client.clone()));
        let feed = HttpFeed::new(&format!("{}/feed.xml", server.url()), client, guard);

        let entries = feed.entries(2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("Botnet takedown"));
    }

    #[tokio::test]
    async fn test_http_feed_outside_allowlist() {
        let config = IntelConfig::new(true, ["feeds.example"]);
        let client = crate::create_client(&config).unwrap();
        let guard = Arc::new(GuardrailPolicy::new(Arc::new(config), client.clone()));
        let feed = HttpFeed::new("https://other.example/feed.xml", client, guard);

        let err = feed.entries(10).await.unwrap_err();
        assert!(err.is_permission());
    }
}
