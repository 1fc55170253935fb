//! Feed ingestion
//!
//! Pulls links from a [`FeedSource`], drops links already stored or repeated
//! within the batch, and classifies the rest one at a time.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use intel_core::FeedItem;
use intel_net::{FeedSource, Url};

use crate::{IntelService, PipelineError, UrlClassification};

/// A link that failed to classify
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkFailure {
    pub link: String,
    pub error: String,
}

/// Outcome of one ingest run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub results: Vec<UrlClassification>,
    pub failures: Vec<LinkFailure>,
}

/// Runs feed batches through an [`IntelService`]
pub struct FeedIngester<'a> {
    service: &'a IntelService,
}

impl<'a> FeedIngester<'a> {
    pub fn new(service: &'a IntelService) -> Self {
        Self { service }
    }

    /// Classify up to `limit` new links from `source`.
    ///
    /// A failing link is recorded in the report and the batch continues;
    /// only feed and store lookup errors abort.
    pub async fn ingest(
        &self,
        source: &dyn FeedSource,
        limit: usize,
        user: Option<&str>,
        justification: Option<&str>,
    ) -> Result<IngestReport, PipelineError> {
        let entries = source.entries(limit).await?;
        let total = entries.len();

        let items: Vec<FeedItem> = entries
            .into_iter()
            .filter_map(|entry| {
                let link = entry.link?;
                if !is_fetchable_link(&link) {
                    debug!("Skipping invalid feed link: {}", link);
                    return None;
                }
                Some(FeedItem::new(entry.title.as_deref().unwrap_or(""), &link))
            })
            .collect();

        let links: Vec<String> = items.iter().map(|item| item.link.clone()).collect();
        let seen = self.service.store().seen_urls(&links).await?;

        let mut batch = HashSet::new();
        let pending: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| !seen.contains(&item.link))
            .filter(|item| batch.insert(item.link_hash.clone()))
            .collect();

        debug!(
            "Feed {}: {} entries, {} already seen, {} to classify",
            source.name(),
            total,
            seen.len(),
            pending.len()
        );

        let mut report = IngestReport::default();
        for item in pending {
            match self.service.classify_url(&item.link, user, justification).await {
                Ok(result) => report.results.push(result),
                Err(e) => {
                    warn!("Failed to classify {}: {}", item.link, e);
                    report.failures.push(LinkFailure {
                        link: item.link,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Ingested feed {}: {} classified, {} failed",
            source.name(),
            report.results.len(),
            report.failures.len()
        );
        Ok(report)
    }
}

/// Absolute http(s) URL with a host
fn is_fetchable_link(link: &str) -> bool {
    Url::parse(link.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}
