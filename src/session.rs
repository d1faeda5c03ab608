// Session orchestration.
//
// One DetectionSession owns one aggregator, the latest environment
// snapshot, and the latest assessment; evaluators are stateless over the
// attributes the session hands them. The SessionRunner wraps a session in
// an ingestion queue plus a periodic evaluation interval so capture and
// analysis stay decoupled and independently testable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{
    Classification, RiskAssessment, SessionState, SpecialVerdict,
};
use crate::config::DetectionConfig;
use crate::error::SentinelError;
use crate::heuristics::{EnvironmentEvaluator, EvaluatorOutput};
use crate::patterns::MovementAnalyzer;
use crate::probe::{run_probes, CapabilityProbe};
use crate::scoring::{ScoreAggregator, SuspicionFactor};
use crate::stats::StreamingAggregator;
use crate::telemetry::{
    EnvironmentAttributes, InputLatencySample, InputModality, MovementSample,
};

/// Retained press/release pairs; FIFO beyond this.
const LATENCY_CAPACITY: usize = 256;

/// Per-session counters. `record_score` keeps a running average without
/// retaining history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub samples_ingested: u64,
    pub samples_dropped: u64,
    pub latency_pairs: u64,
    pub cycles_run: u64,
    pub analyzer_failures: u64,
    pub avg_overall_score: f64,
    score_samples: u64,
}

impl SessionMetrics {
    pub fn record_score(&mut self, score: f64) {
        self.score_samples += 1;
        let delta = score - self.avg_overall_score;
        self.avg_overall_score += delta / self.score_samples as f64;
    }
}

/// Explicit session object owning one aggregator instance. Created per
/// interactive session, passed by reference to evaluators, torn down
/// explicitly at session end. No ambient state.
pub struct DetectionSession {
    id: String,
    config: DetectionConfig,
    aggregator: StreamingAggregator,
    analyzer: MovementAnalyzer,
    evaluator: EnvironmentEvaluator,
    score_aggregator: ScoreAggregator,
    environment: EnvironmentAttributes,
    latency: VecDeque<InputLatencySample>,
    /// Async probe results; replaced as one atomic assignment so a cycle
    /// never observes a partial update.
    probe_factors: BTreeMap<String, SuspicionFactor>,
    latest: RiskAssessment,
    cycle: u64,
    samples_since_eval: usize,
    metrics: SessionMetrics,
}

impl DetectionSession {
    /// Create a session. The external label is hashed before use and never
    /// stored raw.
    pub fn new(label: Option<&str>, config: DetectionConfig) -> Self {
        let id = hash_label(label.unwrap_or("anonymous"));
        info!(session = %id, "detection session created");
        Self {
            aggregator: StreamingAggregator::new(config.window.capacity),
            analyzer: MovementAnalyzer::new(
                config.patterns.clone(),
                config.timing.clone(),
                config.window.min_segments,
            ),
            evaluator: EnvironmentEvaluator::new(config.heuristics.clone()),
            score_aggregator: ScoreAggregator::from_config(&config),
            environment: EnvironmentAttributes::default(),
            latency: VecDeque::with_capacity(LATENCY_CAPACITY),
            probe_factors: BTreeMap::new(),
            latest: RiskAssessment::collecting(0, 0),
            cycle: 0,
            samples_since_eval: 0,
            metrics: SessionMetrics::default(),
            config,
            id,
        }
    }

    pub fn with_defaults(label: Option<&str>) -> Self {
        Self::new(label, DetectionConfig::default())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Ingest one pointer sample. Non-blocking, O(1).
    pub fn ingest(&mut self, sample: MovementSample) {
        if self.aggregator.ingest(sample) {
            self.metrics.samples_ingested += 1;
            self.samples_since_eval += 1;
        } else {
            self.metrics.samples_dropped += 1;
        }
    }

    /// Record one press/release pair for latency sampling.
    pub fn record_latency(&mut self, sample: InputLatencySample) {
        if self.latency.len() == LATENCY_CAPACITY {
            self.latency.pop_front();
        }
        self.latency.push_back(sample);
        self.metrics.latency_pairs += 1;
    }

    /// Replace the environment snapshot wholesale.
    pub fn set_environment(&mut self, attrs: EnvironmentAttributes) {
        self.environment = attrs;
    }

    /// Replace the async probe results wholesale (single atomic assignment).
    pub fn merge_probe_factors(&mut self, factors: BTreeMap<String, SuspicionFactor>) {
        self.probe_factors = factors;
    }

    /// True once enough new samples arrived to justify an off-interval
    /// re-evaluation.
    pub fn should_reevaluate(&self) -> bool {
        self.samples_since_eval >= self.config.evaluation.reevaluate_after_samples
    }

    pub fn latest_assessment(&self) -> &RiskAssessment {
        &self.latest
    }

    /// Run one evaluation cycle and replace the latest assessment
    /// atomically. Pure over the current window, environment snapshot, and
    /// probe results: replaying an unchanged state reproduces an identical
    /// assessment apart from the cycle counter.
    pub fn evaluate_cycle(&mut self) -> &RiskAssessment {
        self.cycle += 1;
        self.metrics.cycles_run += 1;
        self.samples_since_eval = 0;

        let samples_seen = self.aggregator.total_accepted();
        if (samples_seen as usize) < self.config.evaluation.min_sample_count {
            debug!(session = %self.id, samples_seen, "still collecting");
            self.latest = RiskAssessment::collecting(self.cycle, samples_seen);
            return &self.latest;
        }

        let mut failures = 0u64;
        let mut factors: BTreeMap<String, SuspicionFactor> = BTreeMap::new();
        let mut verdicts: Vec<SpecialVerdict> = Vec::new();

        {
            let window = self.aggregator.window();
            let analyzer = &self.analyzer;
            let evaluator = &self.evaluator;
            let environment = &self.environment;
            let latency: Vec<InputLatencySample> = self.latency.iter().copied().collect();

            let mut add = |factor: Option<SuspicionFactor>| {
                if let Some(f) = factor {
                    factors.insert(f.name.clone(), f);
                }
            };

            add(guarded("straight_line", &mut failures, || {
                analyzer.straight_line(window)
            })
            .flatten());
            add(guarded("velocity_consistency", &mut failures, || {
                analyzer.velocity_consistency(window)
            })
            .flatten());
            add(guarded("angular_cardinality", &mut failures, || {
                analyzer.angular_cardinality(window)
            })
            .flatten());
            add(guarded("collinear_run", &mut failures, || {
                analyzer.collinear_run(window)
            })
            .flatten());
            add(guarded("timing_consistency", &mut failures, || {
                timing_factor(analyzer, window, &latency)
            })
            .flatten());

            let mut add_output = |output: Option<EvaluatorOutput>| {
                if let Some(out) = output {
                    if let Some(f) = out.factor {
                        factors.insert(f.name.clone(), f);
                    }
                    verdicts.extend(out.verdicts);
                }
            };

            add_output(guarded("headless", &mut failures, || {
                evaluator.headless(environment)
            }));
            add_output(guarded("virtualization", &mut failures, || {
                evaluator.virtualization(environment)
            }));
            add_output(guarded("remote_access", &mut failures, || {
                evaluator.remote_access(environment, &latency)
            }));
            add_output(guarded("identity_consistency", &mut failures, || {
                evaluator.identity_consistency(environment)
            }));
        }

        // Probe results ride along as additional factors; an analyzer
        // factor with the same name wins.
        for (name, f) in &self.probe_factors {
            factors.entry(name.clone()).or_insert_with(|| f.clone());
        }

        self.metrics.analyzer_failures += failures;

        let scores: BTreeMap<String, f64> =
            factors.iter().map(|(n, f)| (n.clone(), f.score)).collect();
        let reasons: Vec<String> = factors
            .values()
            .filter_map(|f| f.reason.clone())
            .collect();

        verdicts.sort();
        verdicts.dedup();

        let overall = self.score_aggregator.evaluate(&scores);
        let classification = overall
            .map(|s| Classification::from_score(s, &self.config.classification))
            .unwrap_or(Classification::InsufficientData);

        if let Some(score) = overall {
            self.metrics.record_score(score);
        }

        self.latest = RiskAssessment {
            state: SessionState::Evaluating,
            overall_score: overall,
            classification,
            recommended_action: classification.recommended_action(),
            per_factor_scores: scores,
            reasons,
            special_verdicts: verdicts,
            evaluation_cycle: self.cycle,
            samples_seen,
        };
        debug!(
            session = %self.id,
            cycle = self.cycle,
            score = ?overall,
            classification = ?classification,
            "evaluation cycle complete"
        );
        &self.latest
    }

    /// Drop all telemetry and start the window over. Running statistics
    /// reset with it.
    pub fn reset(&mut self) {
        self.aggregator.reset();
        self.latency.clear();
        self.probe_factors.clear();
        self.latest = RiskAssessment::collecting(self.cycle, 0);
        self.samples_since_eval = 0;
    }
}

/// Run one analyzer/evaluator unit, catching any failure locally so it
/// cannot abort the aggregation cycle. A failing unit contributes no
/// factor this cycle.
fn guarded<T>(name: &str, failures: &mut u64, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => Some(v),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let err = SentinelError::AnalyzerFailure {
                analyzer: name.to_string(),
                message,
            };
            warn!(error = %err, "no factor this cycle");
            *failures += 1;
            None
        }
    }
}

/// One timing factor per cycle: the strongest signal across the input
/// categories, each judged against its own cut.
fn timing_factor(
    analyzer: &MovementAnalyzer,
    window: &crate::stats::MovementWindow,
    latency: &[InputLatencySample],
) -> Option<SuspicionFactor> {
    let mut best: Option<SuspicionFactor> = None;
    let mut consider = |candidate: Option<SuspicionFactor>| {
        if let Some(c) = candidate {
            let better = best.as_ref().map_or(true, |b| c.score > b.score);
            if better {
                best = Some(c);
            }
        }
    };

    consider(analyzer.timing_consistency(InputModality::Pointer, window.inter_arrivals()));
    consider(analyzer.timing_consistency(
        InputModality::Keyboard,
        press_gaps(latency, InputModality::Keyboard).into_iter(),
    ));
    consider(analyzer.timing_consistency(
        InputModality::Click,
        press_gaps(latency, InputModality::Click).into_iter(),
    ));

    best
}

/// Inter-arrival gaps between successive presses of one modality.
fn press_gaps(latency: &[InputLatencySample], modality: InputModality) -> Vec<f64> {
    let mut presses: Vec<u64> = latency
        .iter()
        .filter(|s| s.modality == modality)
        .map(|s| s.press_ms)
        .collect();
    presses.sort_unstable();
    presses
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .filter(|gap| *gap > 0.0)
        .collect()
}

fn hash_label(label: &str) -> String {
    let hash = Sha256::digest(label.as_bytes());
    hex::encode(&hash[..8])
}

/// Events accepted by the runner's ingestion queue.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Sample(MovementSample),
    Latency(InputLatencySample),
    Environment(EnvironmentAttributes),
}

/// Cheap clonable handle to a running session: an event sender plus a
/// watch on the latest assessment.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    assessment: watch::Receiver<RiskAssessment>,
}

impl SessionHandle {
    pub fn events(&self) -> mpsc::Sender<SessionEvent> {
        self.events.clone()
    }

    /// The most recently published assessment.
    pub fn latest(&self) -> RiskAssessment {
        self.assessment.borrow().clone()
    }

    /// Wait until the next published assessment.
    pub async fn next_assessment(&mut self) -> Option<RiskAssessment> {
        self.assessment.changed().await.ok()?;
        Some(self.assessment.borrow().clone())
    }
}

/// Drives one session: drains the ingestion queue, re-evaluates on the
/// configured interval and after every burst of new samples, and publishes
/// each assessment. Dropping every handle ends the loop and tears the
/// timer down with the task.
pub struct SessionRunner {
    session: DetectionSession,
    probes: Vec<Box<dyn CapabilityProbe>>,
}

impl SessionRunner {
    pub fn new(session: DetectionSession) -> Self {
        Self {
            session,
            probes: Vec::new(),
        }
    }

    pub fn with_probes(mut self, probes: Vec<Box<dyn CapabilityProbe>>) -> Self {
        self.probes = probes;
        self
    }

    /// Spawn the runner task. Returns a handle plus the join handle, which
    /// yields the session back at teardown.
    pub fn spawn(self, queue_capacity: usize) -> (SessionHandle, JoinHandle<DetectionSession>) {
        let (event_tx, event_rx) = mpsc::channel(queue_capacity.max(1));
        let (assessment_tx, assessment_rx) = watch::channel(RiskAssessment::collecting(0, 0));

        let handle = SessionHandle {
            events: event_tx,
            assessment: assessment_rx,
        };
        let join = tokio::spawn(self.run(event_rx, assessment_tx));
        (handle, join)
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        assessments: watch::Sender<RiskAssessment>,
    ) -> DetectionSession {
        let interval = Duration::from_millis(self.session.config().evaluation.interval_ms);
        let probe_timeout = Duration::from_millis(self.session.config().evaluation.probe_timeout_ms);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; it publishes a collecting
        // assessment, which is the correct initial state.

        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(SessionEvent::Sample(sample)) => {
                        self.session.ingest(sample);
                        if self.session.should_reevaluate() {
                            self.evaluate_and_publish(probe_timeout, &assessments).await;
                        }
                    }
                    Some(SessionEvent::Latency(sample)) => self.session.record_latency(sample),
                    Some(SessionEvent::Environment(attrs)) => self.session.set_environment(attrs),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.evaluate_and_publish(probe_timeout, &assessments).await;
                }
            }
        }

        info!(session = %self.session.id(), "session torn down");
        self.session
    }

    async fn evaluate_and_publish(
        &mut self,
        probe_timeout: Duration,
        assessments: &watch::Sender<RiskAssessment>,
    ) {
        if !self.probes.is_empty() {
            let factors = run_probes(&self.probes, probe_timeout).await;
            self.session.merge_probe_factors(factors);
        }
        let assessment = self.session.evaluate_cycle().clone();
        let _ = assessments.send(assessment);
    }
}
