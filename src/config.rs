// Detection configuration
//
// Every threshold and weight in the pipeline lives here, in one versioned
// structure, so regression tests can pin expected classifications to a
// specific configuration. Several cut points (cardinal-angle tolerance, the
// consecutive-run gates, the timing CoV cuts) are empirically chosen; they
// are tunable fields, not constants, and should be validated against real
// human/automated traces before being trusted further.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Canonical factor names used across analyzers, evaluators, and weights.
pub mod factor {
    pub const STRAIGHT_LINE: &str = "straight_line";
    pub const VELOCITY_CONSISTENCY: &str = "velocity_consistency";
    pub const TIMING_CONSISTENCY: &str = "timing_consistency";
    pub const ANGULAR_CARDINALITY: &str = "angular_cardinality";
    pub const COLLINEAR_RUN: &str = "collinear_run";
    pub const HEADLESS: &str = "headless";
    pub const VIRTUALIZATION: &str = "virtualization";
    pub const REMOTE_ACCESS: &str = "remote_access";
    pub const IDENTITY_CONSISTENCY: &str = "identity_consistency";
}

/// Top-level detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Configuration schema version; bump on any field change
    pub version: u32,
    pub window: WindowConfig,
    pub patterns: PatternThresholds,
    pub timing: TimingThresholds,
    pub heuristics: HeuristicThresholds,
    /// Factor name -> aggregation weight. Weights need not sum to 1;
    /// the aggregator renormalizes over the factors actually present.
    pub weights: BTreeMap<String, f64>,
    pub classification: ClassificationCutoffs,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Movement window capacity (FIFO eviction beyond this)
    pub capacity: usize,
    /// Minimum segments an analyzer needs before producing a verdict
    pub min_segments: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternThresholds {
    /// Triangle-area threshold per unit of segment length; a consecutive
    /// triple is collinear when area < epsilon * segment length
    pub collinear_area_epsilon: f64,
    /// Minimum displacement (px) for a segment to count at all;
    /// filters sub-pixel noise
    pub min_movement_px: f64,
    /// Collinear fraction below this is treated as fully benign
    pub collinear_benign_fraction: f64,
    /// Velocity min/max ratio above this indicates machine-uniform speed
    pub velocity_ratio_uniform: f64,
    /// Velocity coefficient of variation below this indicates uniform speed
    pub velocity_cv_uniform: f64,
    /// Tolerance around 0/90/180/270 degrees (degrees)
    pub cardinal_tolerance_deg: f64,
    /// Cardinal-angle fraction below this is treated as fully benign
    pub cardinal_benign_fraction: f64,
    /// Consecutive collinear run length gate
    pub run_min_length: usize,
    /// Total distance (px) the run must cover to be flagged
    pub run_min_distance_px: f64,
    /// Mean speed (px/s) the run must sustain to be flagged; together with
    /// the length and distance gates this avoids flagging fast human drags
    pub run_min_speed_px_s: f64,
}

/// Timing-consistency cut points per input category. Natural human variance
/// differs by modality, so each gets its own coefficient-of-variation cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingThresholds {
    /// Pointer inter-arrival CoV below this is suspiciously regular
    pub pointer_cv_cut: f64,
    /// Keyboard inter-arrival CoV cut
    pub keyboard_cv_cut: f64,
    /// Click inter-arrival CoV cut
    pub click_cv_cut: f64,
}

impl TimingThresholds {
    pub fn cut_for(&self, modality: crate::telemetry::InputModality) -> f64 {
        use crate::telemetry::InputModality::*;
        match modality {
            Pointer => self.pointer_cv_cut,
            Keyboard => self.keyboard_cv_cut,
            Click => self.click_cv_cut,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicThresholds {
    /// Benchmark elapsed time (ms) above this is outside the native range
    pub benchmark_native_max_ms: f64,
    /// Reported logical CPU count at or below this is VM-typical
    pub low_concurrency_max: u32,
    /// Color depth (bits) at or below this is remote-desktop-typical
    pub remote_color_depth_max: u32,
    /// Mean input hold latency (ms) above this suggests a remote link
    pub remote_latency_min_ms: f64,
    /// Hold-latency CoV below this (with elevated mean) suggests the
    /// uniform buffering a remote link introduces
    pub remote_latency_cv_max: f64,
}

/// Ordered, non-overlapping cut points on the overall score. Must remain
/// monotonic: unusual < suspicious < automated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationCutoffs {
    /// Scores below this are likely-human
    pub unusual: f64,
    /// Scores at or above `unusual` and below this are unusual
    pub suspicious: f64,
    /// Scores at or above this are likely-automated
    pub automated: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Periodic evaluation interval (ms)
    pub interval_ms: u64,
    /// Total samples required before any numeric verdict
    pub min_sample_count: usize,
    /// Also re-evaluate after this many new samples
    pub reevaluate_after_samples: usize,
    /// Per-probe timeout (ms); an overrun probe is "no data"
    pub probe_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(factor::STRAIGHT_LINE.to_string(), 0.25);
        weights.insert(factor::VELOCITY_CONSISTENCY.to_string(), 0.15);
        weights.insert(factor::TIMING_CONSISTENCY.to_string(), 0.15);
        weights.insert(factor::ANGULAR_CARDINALITY.to_string(), 0.10);
        weights.insert(factor::COLLINEAR_RUN.to_string(), 0.15);
        weights.insert(factor::HEADLESS.to_string(), 0.15);
        weights.insert(factor::VIRTUALIZATION.to_string(), 0.10);
        weights.insert(factor::REMOTE_ACCESS.to_string(), 0.20);
        weights.insert(factor::IDENTITY_CONSISTENCY.to_string(), 0.10);

        Self {
            version: 1,
            window: WindowConfig {
                capacity: 150,
                min_segments: 10,
            },
            patterns: PatternThresholds {
                collinear_area_epsilon: 0.5,
                min_movement_px: 2.0,
                collinear_benign_fraction: 0.3,
                velocity_ratio_uniform: 0.8,
                velocity_cv_uniform: 0.1,
                cardinal_tolerance_deg: 8.0,
                cardinal_benign_fraction: 0.5,
                run_min_length: 10,
                run_min_distance_px: 200.0,
                run_min_speed_px_s: 800.0,
            },
            timing: TimingThresholds {
                pointer_cv_cut: 0.15,
                keyboard_cv_cut: 0.25,
                click_cv_cut: 0.30,
            },
            heuristics: HeuristicThresholds {
                benchmark_native_max_ms: 50.0,
                low_concurrency_max: 2,
                remote_color_depth_max: 16,
                remote_latency_min_ms: 120.0,
                remote_latency_cv_max: 0.15,
            },
            weights,
            classification: ClassificationCutoffs {
                unusual: 0.3,
                suspicious: 0.5,
                automated: 0.7,
            },
            evaluation: EvaluationConfig {
                interval_ms: 1500,
                min_sample_count: 10,
                reevaluate_after_samples: 25,
                probe_timeout_ms: 250,
            },
        }
    }
}

impl DetectionConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: DetectionConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(&self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate internal consistency
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window.capacity == 0 {
            anyhow::bail!("window.capacity must be > 0");
        }
        if self.window.min_segments == 0 || self.window.min_segments >= self.window.capacity {
            anyhow::bail!("window.min_segments must be in 1..capacity");
        }

        let c = &self.classification;
        let ordered = 0.0 < c.unusual
            && c.unusual < c.suspicious
            && c.suspicious < c.automated
            && c.automated < 1.0;
        if !ordered {
            anyhow::bail!(
                "classification cutoffs must satisfy 0 < unusual < suspicious < automated < 1, got {}/{}/{}",
                c.unusual,
                c.suspicious,
                c.automated
            );
        }

        if self.weights.is_empty() {
            anyhow::bail!("weights must not be empty");
        }
        for (name, w) in &self.weights {
            if !w.is_finite() || *w < 0.0 {
                anyhow::bail!("weight for '{}' must be finite and >= 0, got {}", name, w);
            }
        }
        if self.weights.values().all(|w| *w == 0.0) {
            anyhow::bail!("at least one weight must be positive");
        }

        let p = &self.patterns;
        if p.cardinal_tolerance_deg <= 0.0 || p.cardinal_tolerance_deg >= 45.0 {
            anyhow::bail!("patterns.cardinal_tolerance_deg must be in (0, 45)");
        }
        if !p.min_movement_px.is_finite() || p.min_movement_px < 0.0 {
            anyhow::bail!("patterns.min_movement_px must be finite and >= 0");
        }
        if p.run_min_length < 2 {
            anyhow::bail!("patterns.run_min_length must be >= 2");
        }

        if self.evaluation.interval_ms == 0 {
            anyhow::bail!("evaluation.interval_ms must be > 0");
        }
        if self.evaluation.min_sample_count == 0 {
            anyhow::bail!("evaluation.min_sample_count must be > 0");
        }

        Ok(())
    }

    /// Weight for a named factor, if configured.
    pub fn weight_for(&self, name: &str) -> Option<f64> {
        self.weights.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, 1);
        assert_eq!(config.window.capacity, 150);
    }

    #[test]
    fn test_default_weights_cover_all_factors() {
        let config = DetectionConfig::default();
        for name in [
            factor::STRAIGHT_LINE,
            factor::VELOCITY_CONSISTENCY,
            factor::TIMING_CONSISTENCY,
            factor::ANGULAR_CARDINALITY,
            factor::COLLINEAR_RUN,
            factor::HEADLESS,
            factor::VIRTUALIZATION,
            factor::REMOTE_ACCESS,
            factor::IDENTITY_CONSISTENCY,
        ] {
            assert!(config.weight_for(name).is_some(), "missing weight for {}", name);
        }
    }

    #[test]
    fn test_validation_rejects_unordered_cutoffs() {
        let mut config = DetectionConfig::default();
        config.classification.suspicious = 0.2; // below unusual
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_negative_weight() {
        let mut config = DetectionConfig::default();
        config.weights.insert("straight_line".to_string(), -0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_all_zero_weights() {
        let mut config = DetectionConfig::default();
        for w in config.weights.values_mut() {
            *w = 0.0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = DetectionConfig::default();
        config.window.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = DetectionConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: DetectionConfig = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.weights, config.weights);
        assert_eq!(parsed.classification.automated, config.classification.automated);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detection.toml");

        let config = DetectionConfig::default();
        config.to_file(&path).unwrap();

        let loaded = DetectionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.version, config.version);
        assert_eq!(loaded.patterns.run_min_length, config.patterns.run_min_length);
    }

    #[test]
    fn test_timing_cut_per_modality() {
        use crate::telemetry::InputModality;
        let config = DetectionConfig::default();
        assert!(
            config.timing.cut_for(InputModality::Pointer)
                < config.timing.cut_for(InputModality::Click)
        );
    }
}
