// Movement-pattern analyzers.
//
// Each analyzer consumes the aggregator's retained window and produces at
// most one bounded suspicion factor. Below its minimum sample count an
// analyzer returns None ("insufficient data") and contributes nothing to
// scoring - that is not the same as a score of zero.

use tracing::trace;

use crate::config::{factor, PatternThresholds, TimingThresholds};
use crate::scoring::SuspicionFactor;
use crate::stats::{coefficient_of_variation, MovementWindow};
use crate::telemetry::{InputModality, MovementSample};

/// Runs the movement-pattern battery against a window snapshot.
#[derive(Debug, Clone)]
pub struct MovementAnalyzer {
    patterns: PatternThresholds,
    timing: TimingThresholds,
    min_segments: usize,
}

impl MovementAnalyzer {
    pub fn new(patterns: PatternThresholds, timing: TimingThresholds, min_segments: usize) -> Self {
        Self {
            patterns,
            timing,
            min_segments,
        }
    }

    /// Fraction of consecutive triples that are collinear, mapped onto
    /// [0,1] above the benign floor. Collinearity: triangle area below a
    /// distance-scaled threshold, with both segments clearing the
    /// minimum-movement floor so sub-pixel noise never counts.
    pub fn straight_line(&self, window: &MovementWindow) -> Option<SuspicionFactor> {
        let samples: Vec<&MovementSample> = window.samples().collect();
        let (collinear, total) = self.count_collinear(&samples);
        if total < self.min_segments {
            return None;
        }

        let fraction = collinear as f64 / total as f64;
        let score = ratio_above_floor(fraction, self.patterns.collinear_benign_fraction);
        trace!(fraction, score, "straight-line analysis");

        let mut f = SuspicionFactor::new(factor::STRAIGHT_LINE, score);
        if score > 0.5 {
            f.reason = Some(format!(
                "{:.0}% of movement segments are collinear",
                fraction * 100.0
            ));
        }
        Some(f)
    }

    /// Machine-uniform speed: min/max velocity ratio near 1 or a
    /// coefficient of variation near 0. Human movement has natural variance.
    pub fn velocity_consistency(&self, window: &MovementWindow) -> Option<SuspicionFactor> {
        if window.segment_count() < self.min_segments {
            return None;
        }

        let mut min = f64::INFINITY;
        let mut max: f64 = 0.0;
        for v in window.velocities() {
            min = min.min(v);
            max = max.max(v);
        }
        let ratio_score = if max > 0.0 {
            ratio_above_floor(min / max, self.patterns.velocity_ratio_uniform)
        } else {
            0.0
        };

        let cv_score = coefficient_of_variation(window.velocities())
            .map(|cv| deficit_below_cut(cv, self.patterns.velocity_cv_uniform))
            .unwrap_or(0.0);

        let score = ratio_score.max(cv_score);
        let mut f = SuspicionFactor::new(factor::VELOCITY_CONSISTENCY, score);
        if score > 0.5 {
            f.reason = Some("movement speed is unnaturally uniform".to_string());
        }
        Some(f)
    }

    /// Inter-arrival regularity for one input category, judged against that
    /// category's CoV cut. The caller supplies the gap series for the
    /// modality; pointer gaps come from the window, key/click gaps from the
    /// latency stream.
    pub fn timing_consistency(
        &self,
        modality: InputModality,
        gaps: impl Iterator<Item = f64> + Clone,
    ) -> Option<SuspicionFactor> {
        let count = gaps.clone().count();
        if count < self.min_segments {
            return None;
        }

        let cv = coefficient_of_variation(gaps)?;
        let cut = self.timing.cut_for(modality);
        let score = deficit_below_cut(cv, cut);

        let mut f = SuspicionFactor::new(factor::TIMING_CONSISTENCY, score);
        if score > 0.5 {
            f.reason = Some(format!(
                "{} timing is metronome-regular (CoV {:.3} < {:.2})",
                modality.label(),
                cv,
                cut
            ));
        }
        Some(f)
    }

    /// Fraction of movement angles within tolerance of 0/90/180/270
    /// degrees. Elevated fractions suggest axis-constrained synthetic
    /// movement.
    pub fn angular_cardinality(&self, window: &MovementWindow) -> Option<SuspicionFactor> {
        if window.segment_count() < self.min_segments {
            return None;
        }

        let tolerance = self.patterns.cardinal_tolerance_deg;
        let cardinal = window
            .angles()
            .filter(|a| {
                let deg = a.to_degrees().rem_euclid(360.0);
                let offset = deg.rem_euclid(90.0);
                offset <= tolerance || offset >= 90.0 - tolerance
            })
            .count();
        let fraction = cardinal as f64 / window.segment_count() as f64;
        let score = ratio_above_floor(fraction, self.patterns.cardinal_benign_fraction);

        let mut f = SuspicionFactor::new(factor::ANGULAR_CARDINALITY, score);
        if score > 0.5 {
            f.reason = Some(format!(
                "{:.0}% of movement is axis-aligned",
                fraction * 100.0
            ));
        }
        Some(f)
    }

    /// Longest run of consecutive collinear segments, flagged only when run
    /// length AND covered distance AND average speed jointly clear the
    /// configured gates. A legitimate fast human drag fails at least one.
    pub fn collinear_run(&self, window: &MovementWindow) -> Option<SuspicionFactor> {
        let samples: Vec<&MovementSample> = window.samples().collect();
        if samples.len() < self.min_segments + 1 {
            return None;
        }

        let best = self.longest_collinear_run(&samples);
        let p = &self.patterns;
        let flagged = best.length >= p.run_min_length
            && best.distance_px >= p.run_min_distance_px
            && best.mean_speed_px_s >= p.run_min_speed_px_s;

        if !flagged {
            return Some(SuspicionFactor::new(factor::COLLINEAR_RUN, 0.0));
        }

        // Score grows with how far past the length gate the run extends.
        let overshoot = (best.length - p.run_min_length) as f64 / p.run_min_length as f64;
        let score = 0.5 + 0.5 * overshoot.min(1.0);
        Some(SuspicionFactor::with_reason(
            factor::COLLINEAR_RUN,
            score,
            format!(
                "{} consecutive collinear segments over {:.0} px at {:.0} px/s",
                best.length, best.distance_px, best.mean_speed_px_s
            ),
        ))
    }

    fn is_collinear(&self, a: &MovementSample, b: &MovementSample, c: &MovementSample) -> bool {
        let ab = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        let bc = ((c.x - b.x).powi(2) + (c.y - b.y).powi(2)).sqrt();
        if ab < self.patterns.min_movement_px || bc < self.patterns.min_movement_px {
            return false;
        }
        let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        let area = cross.abs() / 2.0;
        area < self.patterns.collinear_area_epsilon * ab.max(bc)
    }

    /// (collinear triples, triples clearing the movement floor)
    fn count_collinear(&self, samples: &[&MovementSample]) -> (usize, usize) {
        let mut collinear = 0;
        let mut total = 0;
        for w in samples.windows(3) {
            let ab = ((w[1].x - w[0].x).powi(2) + (w[1].y - w[0].y).powi(2)).sqrt();
            let bc = ((w[2].x - w[1].x).powi(2) + (w[2].y - w[1].y).powi(2)).sqrt();
            if ab < self.patterns.min_movement_px || bc < self.patterns.min_movement_px {
                continue;
            }
            total += 1;
            if self.is_collinear(w[0], w[1], w[2]) {
                collinear += 1;
            }
        }
        (collinear, total)
    }

    fn longest_collinear_run(&self, samples: &[&MovementSample]) -> RunSummary {
        let mut best = RunSummary::default();
        let mut run_start: Option<usize> = None;

        // A run of k collinear triples spans segments [i, i+k+1] of samples.
        for i in 0..samples.len().saturating_sub(2) {
            if self.is_collinear(samples[i], samples[i + 1], samples[i + 2]) {
                run_start.get_or_insert(i);
            } else if let Some(start) = run_start.take() {
                best = best.max(Self::summarize_run(samples, start, i + 1));
            }
        }
        if let Some(start) = run_start {
            best = best.max(Self::summarize_run(samples, start, samples.len() - 1));
        }
        best
    }

    /// Summarize the segment span [start, end] (sample indices).
    fn summarize_run(samples: &[&MovementSample], start: usize, end: usize) -> RunSummary {
        let mut distance = 0.0;
        for i in start..end {
            let (a, b) = (samples[i], samples[i + 1]);
            distance += ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        }
        let elapsed_ms = (samples[end].t - samples[start].t) as f64;
        RunSummary {
            length: end - start,
            distance_px: distance,
            mean_speed_px_s: if elapsed_ms > 0.0 {
                distance / elapsed_ms * 1000.0
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunSummary {
    length: usize,
    distance_px: f64,
    mean_speed_px_s: f64,
}

impl RunSummary {
    fn max(self, other: Self) -> Self {
        if other.length > self.length {
            other
        } else {
            self
        }
    }
}

/// Map a fraction onto [0,1] above a benign floor: at or below the floor
/// the score is 0, at 1.0 the score is 1.
fn ratio_above_floor(fraction: f64, floor: f64) -> f64 {
    if floor >= 1.0 {
        return 0.0;
    }
    ((fraction - floor) / (1.0 - floor)).clamp(0.0, 1.0)
}

/// Map a CoV below its cut onto (0,1]: at the cut the score is 0, at 0 the
/// score is 1. Values at or above the cut score 0.
fn deficit_below_cut(cv: f64, cut: f64) -> f64 {
    if cut <= 0.0 {
        return 0.0;
    }
    ((cut - cv) / cut).clamp(0.0, 1.0)
}
