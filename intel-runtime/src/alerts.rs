//! High-risk alert delivery
//!
//! Posts a Slack-style `{"text": ...}` message to a webhook. Delivery runs on
//! tracked background tasks and failures are only logged. Owners drain the
//! pending deliveries with [`AlertDispatcher::flush`] before exiting.

use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use intel_core::{Finding, IntelConfig};

/// Timeout for one webhook POST
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends alerts for findings at or above a risk threshold
#[derive(Debug)]
pub struct AlertDispatcher {
    client: Client,
    threshold: f64,
    webhook: Option<String>,
    pending: Mutex<JoinSet<()>>,
}

impl AlertDispatcher {
    pub fn new(client: Client, threshold: f64, webhook: Option<String>) -> Self {
        Self {
            client,
            threshold,
            webhook: webhook.filter(|w| !w.trim().is_empty()),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn from_config(client: Client, config: &IntelConfig) -> Self {
        Self::new(client, config.alert_threshold, config.alert_webhook.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.webhook.is_some()
    }

    pub fn should_alert(&self, finding: &Finding) -> bool {
        self.webhook.is_some() && finding.risk >= self.threshold
    }

    /// Webhook payload for a finding
    pub fn message(finding: &Finding) -> serde_json::Value {
        let details = serde_json::to_string_pretty(finding).unwrap_or_else(|_| "{}".to_string());
        json!({
            "text": format!(
                "[Intel] High risk {:.3} ({}) from {}\n```\n{}\n```",
                finding.risk,
                finding.label_name,
                finding.source_url.as_deref().unwrap_or("direct text"),
                details
            )
        })
    }

    /// Start delivery if the finding qualifies; returns whether it did.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, finding: &Finding) -> bool {
        if !self.should_alert(finding) {
            return false;
        }
        let Some(webhook) = self.webhook.clone() else {
            return false;
        };
        let client = self.client.clone();
        let body = Self::message(finding);
        let risk = finding.risk;

        let mut pending = self.pending.lock();
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            let result = client
                .post(&webhook)
                .timeout(ALERT_TIMEOUT)
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => debug!("Alert delivered (risk {:.3})", risk),
                Err(e) => warn!("Alert delivery failed: {}", e),
            }
        });
        true
    }

    /// Deliveries started and not yet reaped
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wait up to `timeout` for in-flight deliveries.
    ///
    /// Returns how many were still running at the deadline; those are aborted.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return 0;
        }
        debug!("Waiting for {} alert deliveries", pending.len());

        let drained = tokio::time::timeout(timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => 0,
            Err(_) => {
                let abandoned = pending.len();
                pending.shutdown().await;
                abandoned
            }
        }
    }
}
