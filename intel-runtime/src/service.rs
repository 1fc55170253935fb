//! The classification service
//!
//! Owns every piece of shared state (HTTP client, guardrails, classifier,
//! store) so one instance can be shared behind an `Arc` by concurrent callers.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use std::time::Duration;
use tracing::{debug, info, warn};

use intel_classify::{ClassifierError, SharedClassifier};
use intel_core::{extract_iocs, risk_score, Finding, IntelConfig, IocMap};
use intel_net::{create_client, FeedSource, Fetcher, GuardrailPolicy, HttpFeed, NetError};
use intel_store::{FindingStore, StoreError};

use crate::{AlertDispatcher, FeedIngester, IngestReport};

/// Upper bound on waiting for in-flight alerts at shutdown
pub const ALERT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors surfaced by pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifierError),

    #[error("Storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("No text to classify")]
    EmptyInput,
}

impl PipelineError {
    /// Allowlist, toggle or robots.txt refusal
    pub fn is_permission(&self) -> bool {
        matches!(self, PipelineError::Net(e) if e.is_permission())
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PipelineError::Net(e) if e.is_rate_limit())
    }

    /// Empty text; malformed URLs are refused by the guardrails instead
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, PipelineError::EmptyInput)
    }
}

/// Result of classifying raw text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextClassification {
    pub label: u32,
    pub label_name: String,
    pub probabilities: Vec<f64>,
    pub risk: f64,
}

/// Result of classifying a fetched page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlClassification {
    pub source_url: String,
    pub label: u32,
    pub label_name: String,
    pub probabilities: Vec<f64>,
    pub risk: f64,
    pub iocs: IocMap,
    /// Row id of the stored finding
    pub finding_id: i64,
}

/// Guarded fetch, classify, persist and alert
pub struct IntelService {
    config: Arc<IntelConfig>,
    client: Client,
    guard: Arc<GuardrailPolicy>,
    fetcher: Fetcher,
    classifier: SharedClassifier,
    store: FindingStore,
    alerts: AlertDispatcher,
}

impl IntelService {
    pub fn new(
        config: IntelConfig,
        classifier: SharedClassifier,
        store: FindingStore,
    ) -> Result<Self, PipelineError> {
        let config = Arc::new(config);
        let client = create_client(&config)?;
        let guard = Arc::new(GuardrailPolicy::new(Arc::clone(&config), client.clone()));
        let fetcher = Fetcher::new(client.clone(), Arc::clone(&guard));
        let alerts = AlertDispatcher::from_config(client.clone(), &config);

        info!(
            "Intel service ready (remote fetch {}, {} allowlist entries, classifier {})",
            if config.allow_remote_fetch { "enabled" } else { "disabled" },
            config.allowlist().len(),
            classifier.name()
        );

        Ok(Self {
            config,
            client,
            guard,
            fetcher,
            classifier,
            store,
            alerts,
        })
    }

    pub fn config(&self) -> &IntelConfig {
        &self.config
    }

    pub fn guard(&self) -> &Arc<GuardrailPolicy> {
        &self.guard
    }

    pub fn store(&self) -> &FindingStore {
        &self.store
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    /// Classify text supplied by the caller; persisted without URL or IOCs
    pub async fn classify_text(&self, text: &str) -> Result<TextClassification, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let prediction = self.classifier.predict(text).await?;
        let risk = risk_score(prediction.label(), prediction.probabilities());
        let (label, probabilities) = prediction.into_parts();

        let finding = Finding::new(label, probabilities, risk);
        let id = self.store.upsert_by_url(&finding).await?;
        debug!("Classified text as {} (finding {})", finding.label_name, id);

        Ok(TextClassification {
            label,
            label_name: finding.label_name,
            probabilities: finding.probabilities,
            risk: finding.risk,
        })
    }

    /// Fetch `url` through the guardrails, classify it, persist and alert
    pub async fn classify_url(
        &self,
        url: &str,
        user: Option<&str>,
        justification: Option<&str>,
    ) -> Result<UrlClassification, PipelineError> {
        let source_url = url.trim();
        let text = self
            .fetcher
            .fetch_and_clean(source_url, user, justification)
            .await?;

        let prediction = self.classifier.predict(&text).await?;
        let risk = risk_score(prediction.label(), prediction.probabilities());
        let (label, probabilities) = prediction.into_parts();
        let iocs = extract_iocs(&text);

        let mut finding = Finding::new(label, probabilities, risk)
            .with_source(source_url)
            .with_iocs(iocs);
        let id = self.store.upsert_by_url(&finding).await?;
        finding.id = Some(id);

        info!(
            "Classified {} as {} (risk {:.3}, finding {})",
            source_url, finding.label_name, finding.risk, id
        );

        self.alerts.notify(&finding);

        Ok(UrlClassification {
            source_url: source_url.to_string(),
            label,
            label_name: finding.label_name,
            probabilities: finding.probabilities,
            risk: finding.risk,
            iocs: finding.iocs,
            finding_id: id,
        })
    }

    /// Classify new links from a feed
    pub async fn ingest(
        &self,
        source: &dyn FeedSource,
        limit: usize,
        user: Option<&str>,
        justification: Option<&str>,
    ) -> Result<IngestReport, PipelineError> {
        FeedIngester::new(self)
            .ingest(source, limit, user, justification)
            .await
    }

    /// Remote RSS/Atom feed sharing this service's client and guardrails
    pub fn http_feed(&self, url: &str) -> HttpFeed {
        HttpFeed::new(url, self.client.clone(), Arc::clone(&self.guard))
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Finding>, PipelineError> {
        Ok(self.store.list_recent(limit).await?)
    }

    /// Wait for in-flight alert deliveries; call before the runtime exits
    pub async fn shutdown(&self) {
        let abandoned = self.alerts.flush(ALERT_DRAIN_TIMEOUT).await;
        if abandoned > 0 {
            warn!("Abandoned {} undelivered alerts at shutdown", abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_classify::KeywordClassifier;
    use intel_net::{FeedEntry, StaticFeed};

    const INDICATOR_PAGE: &str = "<html><body><h1>Ransomware payload</h1>\
        <p>C2 at 10.0.0.1 serving hash \
        e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855</p>\
        <script>track()</script></body></html>";

    const BENIGN_PAGE: &str = "<html><body><p>Travel blog itinerary for the weekend</p></body></html>";

    async fn service(config: IntelConfig) -> IntelService {
        let store = FindingStore::in_memory().await.unwrap();
        let classifier: SharedClassifier = Arc::new(KeywordClassifier::default());
        IntelService::new(config, classifier, store).unwrap()
    }

    fn loopback_config() -> IntelConfig {
        IntelConfig::new(true, ["127.0.0.1"]).with_cooldown(Duration::ZERO)
    }

    async fn mock_robots(server: &mut mockito::ServerGuard) {
        server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn test_classify_text_persists_without_url() {
        let service = service(IntelConfig::default()).await;

        let result = service
            .classify_text("malware c2 ip and hashes observed")
            .await
            .unwrap();
        assert_eq!(result.label_name, "indicator");
        let sum: f64 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3);

        let rows = service.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_url, None);
        assert!(rows[0].iocs.is_empty());
        assert_eq!(rows[0].risk, result.risk);
    }

    #[tokio::test]
    async fn test_classify_text_rejects_empty() {
        let service = service(IntelConfig::default()).await;
        let err = service.classify_text("   ").await.unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_classify_url_persists_and_alerts() {
        let mut server = mockito::Server::new_async().await;
        mock_robots(&mut server).await;
        server
            .mock("GET", "/report")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(INDICATOR_PAGE)
            .create_async()
            .await;
        let hook = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let config = loopback_config().with_alert_webhook(&format!("{}/hook", server.url()), 0.5);
        let service = service(config).await;

        let url = format!("{}/report", server.url());
        let result = service
            .classify_url(&url, Some("analyst"), Some("case 42"))
            .await
            .unwrap();

        assert_eq!(result.label_name, "indicator");
        assert_eq!(result.iocs["ipv4"], vec!["10.0.0.1"]);
        assert_eq!(result.iocs["sha256"].len(), 1);
        assert!(result.risk >= 0.5);

        let rows = service.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_url.as_deref(), Some(url.as_str()));
        assert_eq!(rows[0].id, Some(result.finding_id));

        let audit = service.guard().recent_audit();
        assert_eq!(audit[0].user, "analyst");
        assert_eq!(audit[0].justification, "case 42");

        service.shutdown().await;
        hook.assert_async().await;
    }

    #[test]
    fn test_alert_delivered_before_runtime_exits() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/robots.txt").with_status(404).create();
        server
            .mock("GET", "/report")
            .with_status(200)
            .with_body(INDICATOR_PAGE)
            .create();
        let hook = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create();

        let config = loopback_config().with_alert_webhook(&format!("{}/hook", server.url()), 0.5);
        let url = format!("{}/report", server.url());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let service = service(config).await;
            service.classify_url(&url, None, None).await.unwrap();
            service.shutdown().await;
        });
        drop(runtime);

        hook.assert();
    }

    #[tokio::test]
    async fn test_malformed_url_is_permission_error() {
        let service = service(loopback_config()).await;
        for url in ["not a url", "http://", "file:///etc/passwd"] {
            let err = service.classify_url(url, None, None).await.unwrap_err();
            assert!(err.is_permission(), "{}: {}", url, err);
            assert!(!err.is_invalid_input());
        }
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reclassifying_url_keeps_one_row() {
        let mut server = mockito::Server::new_async().await;
        mock_robots(&mut server).await;
        server
            .mock("GET", "/page")
            .with_status(200)
            .with_body(BENIGN_PAGE)
            .create_async()
            .await;

        let service = service(loopback_config()).await;
        let url = format!("{}/page", server.url());

        let first = service.classify_url(&url, None, None).await.unwrap();
        let second = service.classify_url(&url, None, None).await.unwrap();

        assert_eq!(first.finding_id, second.finding_id);
        assert_eq!(service.store().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disabled_fetch_is_permission_error() {
        let service = service(IntelConfig::new(false, ["*"])).await;
        let err = service
            .classify_url("https://example.com/a", None, None)
            .await
            .unwrap_err();
        assert!(err.is_permission());
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_fetch_inside_cooldown_is_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        mock_robots(&mut server).await;
        server
            .mock("GET", "/page")
            .with_status(200)
            .with_body(BENIGN_PAGE)
            .create_async()
            .await;

        let config = IntelConfig::new(true, ["127.0.0.1"]).with_cooldown(Duration::from_secs(60));
        let service = service(config).await;
        let url = format!("{}/page", server.url());

        service.classify_url(&url, None, None).await.unwrap();
        let err = service.classify_url(&url, None, None).await.unwrap_err();
        assert!(err.is_rate_limit());
    }

    #[tokio::test]
    async fn test_ingest_skips_seen_and_duplicate_links() {
        let mut server = mockito::Server::new_async().await;
        mock_robots(&mut server).await;
        let page_a = server
            .mock("GET", "/a")
            .with_status(200)
            .with_body(BENIGN_PAGE)
            .expect(0)
            .create_async()
            .await;
        let page_b = server
            .mock("GET", "/b")
            .with_status(200)
            .with_body(INDICATOR_PAGE)
            .expect(1)
            .create_async()
            .await;

        let service = service(loopback_config()).await;
        let link_a = format!("{}/a", server.url());
        let link_b = format!("{}/b", server.url());

        service
            .store()
            .upsert_by_url(&Finding::new(0, vec![1.0, 0.0, 0.0], 0.2).with_source(&link_a))
            .await
            .unwrap();

        let feed = StaticFeed::new(
            "fixture",
            vec![
                FeedEntry::new("A", &link_a),
                FeedEntry::new("A again", &link_a),
                FeedEntry::new("B", &link_b),
            ],
        );
        let report = service.ingest(&feed, 10, Some("feed-bot"), None).await.unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].source_url, link_b);
        assert!(report.failures.is_empty());
        page_a.assert_async().await;
        page_b.assert_async().await;
    }

    #[tokio::test]
    async fn test_ingest_dedups_within_batch_and_survives_failures() {
        let mut server = mockito::Server::new_async().await;
        mock_robots(&mut server).await;
        let good = server
            .mock("GET", "/good")
            .with_status(200)
            .with_body(BENIGN_PAGE)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/broken")
            .with_status(500)
            .create_async()
            .await;

        let service = service(loopback_config()).await;
        let good_link = format!("{}/good", server.url());
        let broken_link = format!("{}/broken", server.url());

        let feed = StaticFeed::new(
            "fixture",
            vec![
                FeedEntry::new("broken", &broken_link),
                FeedEntry::new("good", &good_link),
                FeedEntry::new("good dup", &good_link),
                FeedEntry {
                    title: Some("no link".to_string()),
                    link: None,
                },
                FeedEntry::new("relative", "/not/absolute"),
            ],
        );
        let report = service.ingest(&feed, 10, None, None).await.unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].link, broken_link);
        assert!(report.failures[0].error.contains("500"));
        good.assert_async().await;
    }

    #[tokio::test]
    async fn test_ingest_applies_limit_before_filtering() {
        let service = service(IntelConfig::new(false, ["*"])).await;
        let feed = StaticFeed::new(
            "fixture",
            vec![
                FeedEntry::new("a", "https://a.example/1"),
                FeedEntry::new("b", "https://b.example/2"),
                FeedEntry::new("c", "https://c.example/3"),
            ],
        );

        // Fetch disabled: every attempted link fails, so failures count attempts
        let report = service.ingest(&feed, 2, None, None).await.unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_service() {
        let service = Arc::new(service(IntelConfig::default()).await);
        let calls = (0..8).map(|i| {
            let service = Arc::clone(&service);
            async move {
                service
                    .classify_text(&format!("credential phishing advisory {}", i))
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(service.store().count().await.unwrap(), 8);
    }
}
