/// Logistic squashing of a weighted score into `(0, 1)`.
pub fn squash(weighted_sum: f64, gain: f64) -> f64 {
    1.0 / (1.0 + (-gain * weighted_sum).exp())
}

/// Check if confidence meets the minimum threshold
pub fn meets_confidence_threshold(confidence: f64, min_confidence: f64) -> bool {
    confidence >= min_confidence - 1e-6
}

/// Clamp a feature score to `[-1, 1]`, mapping non-finite values to neutral.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
