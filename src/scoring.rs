// Weighted score aggregation.
//
// Analyzers and evaluators each produce at most one bounded suspicion
// factor per cycle. The aggregator owns only the weight table and combines
// whatever factors are present into one overall score; a factor that is
// absent is excluded from numerator and denominator alike - absence of a
// signal is never an implicit zero.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::DetectionConfig;

/// One evaluator's or analyzer's output for a cycle. Scores are clamped to
/// [0,1] at construction; the weight is attached when the factor is folded
/// into an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspicionFactor {
    pub name: String,
    /// Bounded suspicion score in [0,1]
    pub score: f64,
    /// Human-readable trigger explanation, present only when the factor
    /// actually fired
    pub reason: Option<String>,
}

impl SuspicionFactor {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score: score.clamp(0.0, 1.0),
            reason: None,
        }
    }

    pub fn with_reason(name: impl Into<String>, score: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: score.clamp(0.0, 1.0),
            reason: Some(reason.into()),
        }
    }
}

/// Combines per-factor scores into one overall score using the configured
/// weight table. Owns the weights, never the underlying samples.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    weights: BTreeMap<String, f64>,
}

impl ScoreAggregator {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.weights.clone())
    }

    /// Weighted mean over the factors present in `scores`:
    ///   overall = sum(score_i * weight_i) / sum(weight_i for i present)
    ///
    /// Factors without a configured weight are skipped. Accumulation
    /// iterates the sorted map so an identical snapshot always produces a
    /// bit-identical result. Returns None when nothing contributes.
    pub fn evaluate(&self, scores: &BTreeMap<String, f64>) -> Option<f64> {
        let mut numerator = 0.0;
        let mut denominator = 0.0;

        for (name, score) in scores {
            let Some(weight) = self.weights.get(name) else {
                debug!(factor = %name, "no configured weight, skipping factor");
                continue;
            };
            if *weight == 0.0 {
                continue;
            }
            numerator += score.clamp(0.0, 1.0) * weight;
            denominator += weight;
        }

        (denominator > 0.0).then(|| (numerator / denominator).clamp(0.0, 1.0))
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(pairs: &[(&str, f64)]) -> ScoreAggregator {
        ScoreAggregator::new(
            pairs
                .iter()
                .map(|(n, w)| (n.to_string(), *w))
                .collect(),
        )
    }

    #[test]
    fn test_factor_score_clamped() {
        assert_eq!(SuspicionFactor::new("x", 1.7).score, 1.0);
        assert_eq!(SuspicionFactor::new("x", -0.2).score, 0.0);
    }

    #[test]
    fn test_weighted_mean_renormalizes_over_present_factors() {
        // (0.9 * 0.25 + 1.0 * 0.15) / (0.25 + 0.15) = 0.9375
        let agg = aggregator(&[("mouse_patterns", 0.25), ("headless", 0.15)]);
        let mut scores = BTreeMap::new();
        scores.insert("mouse_patterns".to_string(), 0.9);
        scores.insert("headless".to_string(), 1.0);

        let overall = agg.evaluate(&scores).unwrap();
        assert!((overall - 0.9375).abs() < 1e-12);
    }

    #[test]
    fn test_absent_factor_is_not_implicit_zero() {
        let agg = aggregator(&[("a", 0.5), ("b", 0.5)]);

        let mut both = BTreeMap::new();
        both.insert("a".to_string(), 0.8);
        both.insert("b".to_string(), 0.0);

        let mut only_a = BTreeMap::new();
        only_a.insert("a".to_string(), 0.8);

        // With b absent, the score is a's alone - not averaged with zero.
        assert!((agg.evaluate(&both).unwrap() - 0.4).abs() < 1e-12);
        assert!((agg.evaluate(&only_a).unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_yields_no_score() {
        let agg = aggregator(&[("a", 1.0)]);
        assert_eq!(agg.evaluate(&BTreeMap::new()), None);
    }

    #[test]
    fn test_unweighted_factor_skipped() {
        let agg = aggregator(&[("known", 1.0)]);
        let mut scores = BTreeMap::new();
        scores.insert("known".to_string(), 0.5);
        scores.insert("unknown".to_string(), 1.0);

        assert!((agg.evaluate(&scores).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weight_excluded_entirely() {
        let agg = aggregator(&[("a", 0.0), ("b", 0.5)]);
        let mut scores = BTreeMap::new();
        scores.insert("a".to_string(), 1.0);
        scores.insert("b".to_string(), 0.3);

        assert!((agg.evaluate(&scores).unwrap() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_identical_snapshot_is_bit_identical() {
        let agg = ScoreAggregator::from_config(&DetectionConfig::default());
        let mut scores = BTreeMap::new();
        scores.insert("straight_line".to_string(), 0.73);
        scores.insert("headless".to_string(), 0.41);
        scores.insert("remote_access".to_string(), 0.12);

        let first = agg.evaluate(&scores).unwrap();
        for _ in 0..10 {
            assert_eq!(agg.evaluate(&scores).unwrap().to_bits(), first.to_bits());
        }
    }
}
