//! Risk scoring
//!
//! `risk = clamp(weight[label] * max(probabilities), 0, 1)`

/// Weight for labels missing from [`SEVERITY_WEIGHTS`]
pub const DEFAULT_SEVERITY_WEIGHT: f64 = 0.2;

/// Severity weight per label code
pub const SEVERITY_WEIGHTS: &[(u32, f64)] = &[(0, 0.2), (1, 0.7), (2, 1.0)];

pub fn severity_weight(label: u32) -> f64 {
    SEVERITY_WEIGHTS
        .iter()
        .find(|(code, _)| *code == label)
        .map(|(_, weight)| *weight)
        .unwrap_or(DEFAULT_SEVERITY_WEIGHT)
}

/// Risk in [0, 1], rounded to three decimals
pub fn risk_score(label: u32, probabilities: &[f64]) -> f64 {
    let confidence = probabilities
        .iter()
        .copied()
        .filter(|p| p.is_finite())
        .fold(0.0_f64, f64::max);
    let risk = (severity_weight(label) * confidence).clamp(0.0, 1.0);
    (risk * 1000.0).round() / 1000.0
}
