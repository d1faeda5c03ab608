// Library interface for the session-sentinel risk-scoring engine
// Signal acquisition and presentation live with external collaborators;
// this crate owns the scoring pipeline between them.

pub mod classifier;
pub mod config;
pub mod error;
pub mod heuristics;
pub mod patterns;
pub mod probe;
pub mod scoring;
pub mod session;
pub mod stats;
pub mod telemetry;

pub use classifier::{Classification, RecommendedAction, RiskAssessment, SessionState, SpecialVerdict};
pub use config::DetectionConfig;
pub use error::SentinelError;
pub use scoring::SuspicionFactor;
pub use session::{DetectionSession, SessionEvent, SessionHandle, SessionRunner};
pub use telemetry::{EnvironmentAttributes, InputLatencySample, InputModality, MovementSample};
