//! Keyword heuristic classifier
//!
//! Counts taxonomy keywords per label. A keyword matches a token that starts
//! with it ("phish" matches "phishing"); multi-word keywords match as
//! substrings. Each label score is its match count plus a prior, and the
//! scores are normalized into probabilities.

use async_trait::async_trait;
use tracing::debug;

use intel_core::ThreatLabel;

use crate::backend::tokenize;
use crate::{Classifier, ClassifierError, Prediction};

/// Prior for the benign label; other labels start at [`SIGNAL_PRIOR`]
pub const BENIGN_PRIOR: f64 = 1.0;
pub const SIGNAL_PRIOR: f64 = 0.25;

/// Taxonomy-driven classifier
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    taxonomy: Vec<(ThreatLabel, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::with_taxonomy(vec![
            (
                ThreatLabel::ThreatAdvisory,
                vec![
                    "phish", "spoof", "credential", "login", "fraud", "cve", "zero-day",
                    "exploit", "patch", "vulnerab", "advisory", "campaign", "actor",
                ],
            ),
            (
                ThreatLabel::Indicator,
                vec![
                    "malware", "ransom", "trojan", "botnet", "payload", "c2",
                    "command and control", "backdoor", "beacon", "hash", "ioc",
                    "indicator",
                ],
            ),
        ])
    }
}

impl KeywordClassifier {
    /// Build from (label, keywords) pairs; keywords are lowercased
    pub fn with_taxonomy(taxonomy: Vec<(ThreatLabel, Vec<&str>)>) -> Self {
        Self {
            taxonomy: taxonomy
                .into_iter()
                .map(|(label, keywords)| {
                    (
                        label,
                        keywords.into_iter().map(|k| k.trim().to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Keywords of `label` present in `text`
    pub fn matched_keywords(&self, text: &str, label: ThreatLabel) -> Vec<String> {
        let lower = text.to_lowercase();
        let tokens = tokenize(text);

        self.taxonomy
            .iter()
            .filter(|(l, _)| *l == label)
            .flat_map(|(_, keywords)| keywords.iter())
            .filter(|kw| {
                if kw.chars().any(|c| !c.is_alphanumeric()) {
                    lower.contains(kw.as_str())
                } else {
                    tokens.iter().any(|t| t.starts_with(kw.as_str()))
                }
            })
            .cloned()
            .collect()
    }

    fn scores(&self, text: &str) -> Vec<f64> {
        ThreatLabel::ALL
            .iter()
            .map(|label| {
                let prior = if *label == ThreatLabel::Benign {
                    BENIGN_PRIOR
                } else {
                    SIGNAL_PRIOR
                };
                prior + self.matched_keywords(text, *label).len() as f64
            })
            .collect()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn predict(&self, text: &str) -> Result<Prediction, ClassifierError> {
        let scores = self.scores(text);
        debug!("Keyword scores: {:?}", scores);
        Prediction::from_scores(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_is_benign() {
        let classifier = KeywordClassifier::default();
        let p = classifier
            .predict("sports news about the local team")
            .await
            .unwrap();
        assert_eq!(p.label(), ThreatLabel::Benign.code());
    }

    #[tokio::test]
    async fn test_advisory_keywords() {
        let classifier = KeywordClassifier::default();
        let p = classifier
            .predict("Credential phishing campaign spoofing bank login pages")
            .await
            .unwrap();
        assert_eq!(p.label(), ThreatLabel::ThreatAdvisory.code());
    }

    #[tokio::test]
    async fn test_indicator_keywords() {
        let classifier = KeywordClassifier::default();
        let p = classifier
            .predict("Ransomware payload beacons to C2; botnet hashes attached")
            .await
            .unwrap();
        assert_eq!(p.label(), ThreatLabel::Indicator.code());
        assert!(p.confidence() > 0.5);
    }

    #[test]
    fn test_keyword_matches_word_starts_only() {
        let classifier = KeywordClassifier::default();
        assert!(classifier
            .matched_keywords("the abc2 build", ThreatLabel::Indicator)
            .is_empty());
        assert_eq!(
            classifier.matched_keywords("new zero-day in the wild", ThreatLabel::ThreatAdvisory),
            vec!["zero-day"]
        );
    }

    #[tokio::test]
    async fn test_contract_holds_for_samples() {
        let classifier = KeywordClassifier::default();
        for text in [
            "",
            "travel blog itinerary",
            "malware c2 ip and hashes observed",
            "credential stuffing advisory",
            "CVE-2024-0001 exploit patch released for botnet payload",
        ] {
            let p = classifier.predict(text).await.unwrap();
            let sum: f64 = p.probabilities().iter().sum();
            assert!((sum - 1.0).abs() < 1e-3, "sum {} for {:?}", sum, text);
            let max = p.probabilities().iter().copied().fold(0.0, f64::max);
            assert_eq!(p.confidence(), max);
        }
    }
}
