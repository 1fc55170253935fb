//! Classifier contract

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use intel_core::label_name;

/// Errors from classifier operations
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid scores: {0}")]
    InvalidScores(String),
}

/// Tolerance on the probability sum
pub const PROBABILITY_TOLERANCE: f64 = 1e-3;

/// Label plus normalized probabilities.
///
/// Only constructible through [`Prediction::from_scores`] or
/// [`Prediction::from_logits`], so every value satisfies: probabilities are
/// finite, non-negative, sum to 1 and `label` indexes the largest one
/// (lowest index on ties).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    label: u32,
    probabilities: Vec<f64>,
}

impl Prediction {
    /// Normalize non-negative scores into probabilities
    pub fn from_scores(scores: &[f64]) -> Result<Self, ClassifierError> {
        if scores.is_empty() {
            return Err(ClassifierError::InvalidScores("no scores".to_string()));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(ClassifierError::InvalidScores(format!(
                "score {} is negative or not finite",
                bad
            )));
        }

        let total: f64 = scores.iter().sum();
        if total <= 0.0 {
            return Err(ClassifierError::InvalidScores("scores sum to zero".to_string()));
        }

        let probabilities: Vec<f64> = scores.iter().map(|s| s / total).collect();
        let label = argmax(&probabilities);
        Ok(Self {
            label,
            probabilities,
        })
    }

    /// Softmax over finite logits
    pub fn from_logits(logits: &[f64]) -> Result<Self, ClassifierError> {
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(ClassifierError::InvalidScores("logit not finite".to_string()));
        }
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        Self::from_scores(&exps)
    }

    pub fn label(&self) -> u32 {
        self.label
    }

    pub fn label_name(&self) -> &'static str {
        label_name(self.label)
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Probability of the predicted label
    pub fn confidence(&self) -> f64 {
        self.probabilities[self.label as usize]
    }

    pub fn into_parts(self) -> (u32, Vec<f64>) {
        (self.label, self.probabilities)
    }
}

fn argmax(values: &[f64]) -> u32 {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best as u32
}

/// Text -> (label, probabilities).
///
/// Implementations must not mutate shared state observable by callers;
/// one-time warm-up (loading prototypes, models) is allowed.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classifier variant name
    fn name(&self) -> &str;

    /// Classify one text
    async fn predict(&self, text: &str) -> Result<Prediction, ClassifierError>;
}

/// Thread-safe reference to a classifier
pub type SharedClassifier = Arc<dyn Classifier>;

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_contract(p: &Prediction) {
        let sum: f64 = p.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < PROBABILITY_TOLERANCE);
        assert!(p.probabilities().iter().all(|x| x.is_finite() && *x >= 0.0));
        assert_eq!(p.label(), argmax(p.probabilities()));
    }

    #[test]
    fn test_from_scores_normalizes() {
        let p = Prediction::from_scores(&[1.0, 3.0, 0.0]).unwrap();
        assert_eq!(p.label(), 1);
        assert_eq!(p.label_name(), "threat-advisory");
        assert!((p.confidence() - 0.75).abs() < 1e-12);
        assert_contract(&p);
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let p = Prediction::from_scores(&[0.0, 2.0, 2.0]).unwrap();
        assert_eq!(p.label(), 1);
    }

    #[test]
    fn test_rejects_invalid_scores() {
        assert!(Prediction::from_scores(&[]).is_err());
        assert!(Prediction::from_scores(&[0.0, 0.0]).is_err());
        assert!(Prediction::from_scores(&[1.0, -0.5]).is_err());
        assert!(Prediction::from_scores(&[f64::NAN, 1.0]).is_err());
        assert!(Prediction::from_logits(&[f64::INFINITY, 1.0]).is_err());
    }

    #[test]
    fn test_softmax_is_stable() {
        let p = Prediction::from_logits(&[1000.0, 1001.0, 999.0]).unwrap();
        assert_eq!(p.label(), 1);
        assert_contract(&p);
    }
}
