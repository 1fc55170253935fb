//! Prototype-centroid classifier
//!
//! Embeds a handful of labelled prototype texts once, averages them into one
//! centroid per label and scores new text by cosine similarity to each
//! centroid. Similarities are scaled by a temperature and softmaxed.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use intel_core::ThreatLabel;

use crate::{Classifier, ClassifierError, Embedder, Prediction};

/// Default logit scale applied to cosine similarities
pub const DEFAULT_TEMPERATURE: f64 = 10.0;

/// Built-in labelled prototypes
pub fn default_prototypes() -> Vec<(String, ThreatLabel)> {
    [
        ("phishing indicators and email lures", ThreatLabel::ThreatAdvisory),
        ("benign product release notes", ThreatLabel::Benign),
        ("malware c2 ip and hashes observed", ThreatLabel::Indicator),
        ("sports news about local team", ThreatLabel::Benign),
        ("credential stuffing advisory", ThreatLabel::ThreatAdvisory),
        ("travel blog itinerary", ThreatLabel::Benign),
        ("security advisory for a critical cve with exploit and patch", ThreatLabel::ThreatAdvisory),
        ("ransomware payload beacons to command and control server", ThreatLabel::Indicator),
        ("recipe for a weeknight pasta dinner", ThreatLabel::Benign),
        ("botnet trojan hashes and indicators of compromise", ThreatLabel::Indicator),
    ]
    .into_iter()
    .map(|(text, label)| (text.to_string(), label))
    .collect()
}

/// Classifies by similarity to per-label prototype centroids
pub struct EmbeddingClassifier<E> {
    embedder: E,
    prototypes: Vec<(String, ThreatLabel)>,
    temperature: f64,
    centroids: OnceCell<Vec<Vec<f32>>>,
}

impl<E: Embedder> EmbeddingClassifier<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            prototypes: default_prototypes(),
            temperature: DEFAULT_TEMPERATURE,
            centroids: OnceCell::new(),
        }
    }

    /// Replace the prototypes; every label needs at least one
    pub fn with_prototypes(
        mut self,
        prototypes: Vec<(String, ThreatLabel)>,
    ) -> Result<Self, ClassifierError> {
        if let Some(missing) = ThreatLabel::ALL
            .iter()
            .find(|label| !prototypes.iter().any(|(_, l)| l == *label))
        {
            return Err(ClassifierError::Config(format!(
                "no prototypes for label {}",
                missing.name()
            )));
        }
        self.prototypes = prototypes;
        Ok(self)
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Centroids indexed by label code, computed on first use
    async fn centroids(&self) -> Result<&Vec<Vec<f32>>, ClassifierError> {
        self.centroids
            .get_or_try_init(|| async {
                let texts: Vec<String> = self.prototypes.iter().map(|(t, _)| t.clone()).collect();
                let vectors = self.embedder.embed(&texts).await?;
                if vectors.len() != texts.len() {
                    return Err(ClassifierError::Backend(format!(
                        "expected {} prototype embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    )));
                }

                let centroids: Vec<Vec<f32>> = ThreatLabel::ALL
                    .iter()
                    .map(|label| {
                        let members: Vec<&Vec<f32>> = self
                            .prototypes
                            .iter()
                            .zip(&vectors)
                            .filter(|((_, l), _)| l == label)
                            .map(|(_, v)| v)
                            .collect();
                        mean(&members)
                    })
                    .collect();

                info!(
                    "Built {} centroids from {} prototypes with {}",
                    ThreatLabel::ALL.len(),
                    texts.len(),
                    self.embedder.model_name()
                );
                Ok(centroids)
            })
            .await
    }
}

#[async_trait]
impl<E: Embedder> Classifier for EmbeddingClassifier<E> {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn predict(&self, text: &str) -> Result<Prediction, ClassifierError> {
        let centroids = self.centroids().await?;

        let embedded = self.embedder.embed(&[text.to_string()]).await?;
        let vector = embedded
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::Backend("empty embedding response".to_string()))?;

        let logits: Vec<f64> = centroids
            .iter()
            .map(|c| cosine_similarity(&vector, c) * self.temperature)
            .collect();
        debug!("Embedding logits: {:?}", logits);

        Prediction::from_logits(&logits)
    }
}

fn mean(vectors: &[&Vec<f32>]) -> Vec<f32> {
    let dims = vectors.iter().map(|v| v.len()).max().unwrap_or(0);
    let mut out = vec![0.0_f32; dims];
    for v in vectors {
        for (o, x) in out.iter_mut().zip(v.iter()) {
            *o += x;
        }
    }
    if !vectors.is_empty() {
        let n = vectors.len() as f32;
        out.iter_mut().for_each(|o| *o /= n);
    }
    out
}

/// Cosine similarity; 0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
