//! Guarded page fetcher
//!
//! Fetches a page only after the guardrails approve it, then reduces the
//! HTML to plain text for classification.

use reqwest::Client;
use scraper::node::Node;
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{GuardrailPolicy, NetError};

/// Fetches and cleans pages behind a [`GuardrailPolicy`]
pub struct Fetcher {
    client: Client,
    guard: Arc<GuardrailPolicy>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(client: Client, guard: Arc<GuardrailPolicy>) -> Self {
        let timeout = guard.config().fetch_timeout;
        Self {
            client,
            guard,
            timeout,
        }
    }

    pub fn guard(&self) -> &Arc<GuardrailPolicy> {
        &self.guard
    }

    /// Enforce guardrails, GET the page and return its visible text.
    ///
    /// The rate-limit slot is consumed as soon as the guardrails pass, even
    /// if the request itself fails.
    pub async fn fetch_and_clean(
        &self,
        url: &str,
        user: Option<&str>,
        justification: Option<&str>,
    ) -> Result<String, NetError> {
        let approved = self.guard.enforce(url, user, justification).await?;

        debug!("Fetching: {}", approved);

        let response = self
            .client
            .get(approved.clone())
            .send()
            .await
            .map_err(|e| NetError::from_request(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Fetch of {} returned status: {}", approved, status);
            return Err(NetError::Status {
                url: approved.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| NetError::from_request(e, self.timeout))?;
        let text = clean_html(&html);

        debug!("Fetched {} chars of text from {}", text.len(), approved);
        Ok(text)
    }
}

/// Drop script/style/noscript subtrees and flatten the rest to text
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text_parts = Vec::new();

    for node_ref in document.root_element().descendants() {
        if let Node::Text(text_node) = node_ref.value() {
            let in_excluded = node_ref.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| matches!(el.name(), "script" | "style" | "noscript"))
                    .unwrap_or(false)
            });

            if !in_excluded {
                let trimmed = text_node.trim();
                if !trimmed.is_empty() {
                    text_parts.push(trimmed);
                }
            }
        }
    }

    normalize_whitespace(&text_parts.join(" "))
}

/// Collapse whitespace runs to single spaces and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
