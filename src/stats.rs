// Streaming statistics over the movement telemetry stream.
//
// The aggregator maintains a bounded FIFO window of raw samples plus
// parallel bounded series of per-segment derived metrics (velocity, angle,
// inter-arrival time), and cumulative running statistics per metric. Ingest
// is O(1) per event so it never starves the host; analyzers read the
// retained series at the much lower evaluation cadence.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::telemetry::MovementSample;

/// Incremental min/max/sum/count for one tracked metric. Never recomputed
/// from scratch except on window reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: u64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation in. Non-finite values are ignored.
    pub fn update(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.sum += value;
        self.count += 1;
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// min/max ratio in [0,1]; None until two observations exist or when
    /// max is zero.
    pub fn min_max_ratio(&self) -> Option<f64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if self.count >= 2 && max > 0.0 => Some(min / max),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Mean and coefficient of variation (stddev/mean) of a series.
/// Returns None for fewer than two values or a non-positive mean.
pub fn coefficient_of_variation(values: impl Iterator<Item = f64> + Clone) -> Option<f64> {
    let mut count = 0u64;
    let mut sum = 0.0;
    for v in values.clone() {
        count += 1;
        sum += v;
    }
    if count < 2 {
        return None;
    }
    let mean = sum / count as f64;
    if mean <= 0.0 {
        return None;
    }
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    Some(variance.sqrt() / mean)
}

/// Bounded ordered sequence of samples with parallel derived series.
///
/// Accepted samples have strictly increasing timestamps, so every adjacent
/// pair yields exactly one derived segment: the derived series stay at
/// `len() - 1` entries and evict in lockstep with the samples.
#[derive(Debug, Clone)]
pub struct MovementWindow {
    capacity: usize,
    samples: VecDeque<MovementSample>,
    velocities: VecDeque<f64>,
    angles: VecDeque<f64>,
    inter_arrivals: VecDeque<f64>,
}

impl MovementWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity),
            velocities: VecDeque::with_capacity(capacity),
            angles: VecDeque::with_capacity(capacity),
            inter_arrivals: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of derived segments currently retained.
    pub fn segment_count(&self) -> usize {
        self.velocities.len()
    }

    pub fn last(&self) -> Option<&MovementSample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &MovementSample> + Clone {
        self.samples.iter()
    }

    /// Per-segment velocities (px/s), oldest first.
    pub fn velocities(&self) -> impl Iterator<Item = f64> + Clone + '_ {
        self.velocities.iter().copied()
    }

    /// Per-segment movement angles (radians, atan2 convention), oldest first.
    pub fn angles(&self) -> impl Iterator<Item = f64> + Clone + '_ {
        self.angles.iter().copied()
    }

    /// Per-segment inter-arrival times (ms), oldest first.
    pub fn inter_arrivals(&self) -> impl Iterator<Item = f64> + Clone + '_ {
        self.inter_arrivals.iter().copied()
    }

    fn push(&mut self, sample: MovementSample) -> Option<DerivedSegment> {
        let derived = self.samples.back().map(|prev| {
            let dt_ms = (sample.t - prev.t) as f64;
            let dx = sample.x - prev.x;
            let dy = sample.y - prev.y;
            let distance = (dx * dx + dy * dy).sqrt();
            DerivedSegment {
                velocity: distance / dt_ms * 1000.0,
                angle: dy.atan2(dx),
                inter_arrival_ms: dt_ms,
            }
        });

        self.samples.push_back(sample);
        if let Some(d) = derived {
            self.velocities.push_back(d.velocity);
            self.angles.push_back(d.angle);
            self.inter_arrivals.push_back(d.inter_arrival_ms);
        }

        // FIFO eviction keeps length <= capacity; derived series shed the
        // segment that involved the evicted sample.
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
            self.velocities.pop_front();
            self.angles.pop_front();
            self.inter_arrivals.pop_front();
        }

        derived
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.velocities.clear();
        self.angles.clear();
        self.inter_arrivals.clear();
    }
}

/// Metrics derived from one accepted segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedSegment {
    /// px/s
    pub velocity: f64,
    /// radians
    pub angle: f64,
    /// ms
    pub inter_arrival_ms: f64,
}

/// Owns one session's movement window and running statistics. Single writer:
/// each session has exactly one aggregator, no cross-session sharing.
#[derive(Debug)]
pub struct StreamingAggregator {
    window: MovementWindow,
    position_x: RunningStats,
    position_y: RunningStats,
    velocity: RunningStats,
    angle: RunningStats,
    inter_arrival: RunningStats,
    total_accepted: u64,
    total_dropped: u64,
}

impl StreamingAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: MovementWindow::new(capacity),
            position_x: RunningStats::new(),
            position_y: RunningStats::new(),
            velocity: RunningStats::new(),
            angle: RunningStats::new(),
            inter_arrival: RunningStats::new(),
            total_accepted: 0,
            total_dropped: 0,
        }
    }

    /// Ingest one sample. Returns true when accepted. Samples with
    /// non-finite coordinates or non-monotonic timestamps are dropped
    /// and counted; they never enter the window or the statistics. O(1).
    pub fn ingest(&mut self, sample: MovementSample) -> bool {
        if !sample.is_finite() {
            debug!(t = sample.t, "dropping sample with non-finite coordinate");
            self.total_dropped += 1;
            return false;
        }
        if let Some(last) = self.window.last() {
            if sample.t <= last.t {
                debug!(t = sample.t, last = last.t, "dropping non-monotonic sample");
                self.total_dropped += 1;
                return false;
            }
        }

        self.position_x.update(sample.x);
        self.position_y.update(sample.y);

        // First sample in a window yields no derived metric.
        if let Some(d) = self.window.push(sample) {
            self.velocity.update(d.velocity);
            self.angle.update(d.angle);
            self.inter_arrival.update(d.inter_arrival_ms);
        }
        self.total_accepted += 1;
        true
    }

    pub fn window(&self) -> &MovementWindow {
        &self.window
    }

    pub fn velocity_stats(&self) -> &RunningStats {
        &self.velocity
    }

    pub fn angle_stats(&self) -> &RunningStats {
        &self.angle
    }

    pub fn inter_arrival_stats(&self) -> &RunningStats {
        &self.inter_arrival
    }

    pub fn position_stats(&self) -> (&RunningStats, &RunningStats) {
        (&self.position_x, &self.position_y)
    }

    pub fn total_accepted(&self) -> u64 {
        self.total_accepted
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Reset the window and all running statistics together. The only
    /// path that recomputes anything from scratch.
    pub fn reset(&mut self) {
        self.window.reset();
        self.position_x.reset();
        self.position_y.reset();
        self.velocity.reset();
        self.angle.reset();
        self.inter_arrival.reset();
        self.total_accepted = 0;
        self.total_dropped = 0;
    }
}
