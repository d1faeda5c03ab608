// Telemetry types supplied by external signal collectors.
//
// The engine never captures anything itself: pointer samples, input latency
// pairs, and the environment attribute snapshot all arrive from collaborators.
// Every attribute is optional - absence of a signal is a first-class state
// and is never conflated with a negative reading.

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// One captured pointer position. Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSample {
    /// X coordinate in pixels
    pub x: f64,
    /// Y coordinate in pixels
    pub y: f64,
    /// Monotonic timestamp (ms)
    pub t: u64,
}

impl MovementSample {
    pub fn new(x: f64, y: f64, t: u64) -> Self {
        Self { x, y, t }
    }

    /// A sample is well-formed when both coordinates are finite.
    /// Monotonicity is checked against the window at ingestion.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Input category for timing analysis. Natural human variance differs by
/// modality, so timing thresholds are configured per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    Pointer,
    Keyboard,
    Click,
}

impl InputModality {
    pub fn label(&self) -> &'static str {
        match self {
            InputModality::Pointer => "pointer",
            InputModality::Keyboard => "keyboard",
            InputModality::Click => "click",
        }
    }
}

/// One press/release timestamp pair, used for input round-trip latency
/// sampling. Only timestamps are carried - no key identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputLatencySample {
    pub modality: InputModality,
    /// Press timestamp (monotonic ms)
    pub press_ms: u64,
    /// Release timestamp (monotonic ms)
    pub release_ms: u64,
}

impl InputLatencySample {
    /// Press-to-release duration, or None when the pair is inverted.
    pub fn hold_ms(&self) -> Option<u64> {
        self.release_ms.checked_sub(self.press_ms)
    }
}

/// Discrete environment attributes reported by the host, queried once per
/// evaluation cycle. Every field is optional: evaluators exclude tests whose
/// required attribute is absent rather than counting them as pass or fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentAttributes {
    /// Reported identity string (user agent or equivalent)
    pub identity: Option<String>,
    /// Reported platform string
    pub platform: Option<String>,
    /// Screen width in pixels
    pub screen_width: Option<u32>,
    /// Screen height in pixels
    pub screen_height: Option<u32>,
    /// Screen color depth in bits
    pub color_depth: Option<u32>,
    /// Outer window width (zero is a headless tell)
    pub outer_width: Option<u32>,
    /// Outer window height
    pub outer_height: Option<u32>,
    /// Rendering-backend vendor string
    pub renderer_vendor: Option<String>,
    /// Rendering-backend renderer string
    pub renderer: Option<String>,
    /// Reported logical CPU count
    pub hardware_concurrency: Option<u32>,
    /// Maximum simultaneous touch points
    pub max_touch_points: Option<u32>,
    /// Number of reported plugins
    pub plugin_count: Option<u32>,
    /// Number of reported languages
    pub language_count: Option<u32>,
    /// Automation/webdriver flag as reported by the host
    pub automation_flag: Option<bool>,
    /// Whether the vendor-specific runtime marker is present
    /// (e.g. the embedder object a genuine build of the claimed browser exposes)
    pub vendor_marker_present: Option<bool>,
    /// Elapsed time for a fixed computational benchmark (ms)
    pub benchmark_elapsed_ms: Option<f64>,
    /// Hash produced by the canvas-rendering fingerprint collaborator
    pub canvas_hash: Option<String>,
    /// Hash produced by the GPU-rendering fingerprint collaborator
    pub gpu_hash: Option<String>,
}

impl EnvironmentAttributes {
    /// True when no attribute at all was supplied.
    pub fn is_empty(&self) -> bool {
        *self == EnvironmentAttributes::default()
    }
}

/// A recorded trace as loaded by the replay binary: one session's samples,
/// latency pairs, and environment snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedTrace {
    /// External session label; hashed before use, never stored raw
    pub label: Option<String>,
    pub samples: Vec<MovementSample>,
    #[serde(default)]
    pub latency: Vec<InputLatencySample>,
    #[serde(default)]
    pub environment: EnvironmentAttributes,
}

impl RecordedTrace {
    /// Reject a trace file containing malformed records. Live ingestion
    /// drops bad samples one at a time; a recorded file containing them
    /// was written by a broken collector and is refused outright.
    pub fn validate(&self) -> crate::error::Result<()> {
        for (i, s) in self.samples.iter().enumerate() {
            if !s.is_finite() {
                return Err(SentinelError::MalformedSample(format!(
                    "sample {} has a non-finite coordinate",
                    i
                )));
            }
        }
        for (i, l) in self.latency.iter().enumerate() {
            if l.hold_ms().is_none() {
                return Err(SentinelError::MalformedSample(format!(
                    "latency pair {} releases before it presses",
                    i
                )));
            }
        }
        Ok(())
    }
}
