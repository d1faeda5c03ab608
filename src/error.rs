// Error taxonomy for the risk-scoring pipeline.
//
// None of these are fatal to a consumer: missing capabilities and probe
// timeouts degrade to "not applicable" factors, malformed samples are
// dropped at ingestion, and analyzer failures skip one factor for one
// cycle. The taxonomy exists so the session layer can log and count each
// class distinctly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SentinelError {
    /// A required environment attribute was not supplied. The affected
    /// factor is marked "not applicable" for the cycle.
    #[error("missing capability: {0}")]
    MissingCapability(String),

    /// A sample had a non-finite coordinate or non-monotonic timestamp.
    /// Live ingestion drops and counts it; recorded traces are refused.
    #[error("malformed sample: {0}")]
    MalformedSample(String),

    /// A bounded-duration capability probe exceeded its allotted time.
    /// Treated identically to a missing capability.
    #[error("probe '{probe}' timed out after {timeout_ms}ms")]
    ProbeTimeout { probe: String, timeout_ms: u64 },

    /// An analyzer or evaluator failed internally. The failing unit
    /// contributes no factor this cycle; the rest of the pipeline proceeds.
    #[error("analyzer '{analyzer}' failed: {message}")]
    AnalyzerFailure { analyzer: String, message: String },
}

pub type Result<T> = std::result::Result<T, SentinelError>;
