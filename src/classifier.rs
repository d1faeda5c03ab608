// Classification of the aggregated risk score.
//
// The session starts in Collecting and produces no numeric verdict until
// the minimum sample count is reached; after that every evaluation cycle
// buckets the overall score through ordered, non-overlapping cut points.
// Special verdict tags ride alongside the bucket - they are independent
// observations, not alternatives to it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ClassificationCutoffs;

/// Verdict state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Total sample count below the configured minimum
    Collecting,
    /// Recurring evaluation cycle active
    Evaluating,
}

/// Classification bucket for the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Below the minimum sample threshold, or no factor produced a score
    InsufficientData,
    LikelyHuman,
    Unusual,
    Suspicious,
    LikelyAutomated,
}

impl Classification {
    /// Bucket a score through the monotonic cut points.
    pub fn from_score(score: f64, cutoffs: &ClassificationCutoffs) -> Self {
        if score >= cutoffs.automated {
            Classification::LikelyAutomated
        } else if score >= cutoffs.suspicious {
            Classification::Suspicious
        } else if score >= cutoffs.unusual {
            Classification::Unusual
        } else {
            Classification::LikelyHuman
        }
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        match self {
            Classification::InsufficientData | Classification::LikelyHuman => {
                RecommendedAction::Allow
            }
            Classification::Unusual | Classification::Suspicious => RecommendedAction::Challenge,
            Classification::LikelyAutomated => RecommendedAction::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Allow,
    Challenge,
    Block,
}

/// Specialized tags emitted alongside the numeric classification. Not
/// mutually exclusive with the bucket or with each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialVerdict {
    /// Remote-desktop link indicators present
    RemoteDesktop,
    /// Virtualized environment indicators present
    VirtualMachine,
    /// A specific remote-access product was recognized by name
    NamedRemoteSoftware(String),
}

/// The terminal output of one evaluation cycle. Replaced wholesale each
/// cycle, never partially mutated. Carries a deterministic cycle counter
/// rather than a wall-clock stamp so replaying an unchanged window
/// reproduces an identical assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub state: SessionState,
    /// Overall risk score in [0,1]; None while collecting or when no
    /// factor was applicable
    pub overall_score: Option<f64>,
    pub classification: Classification,
    pub recommended_action: RecommendedAction,
    /// Factor name -> score for every factor that contributed
    pub per_factor_scores: BTreeMap<String, f64>,
    /// Trigger explanations from factors that fired
    pub reasons: Vec<String>,
    /// Independent tags (sorted, deduplicated)
    pub special_verdicts: Vec<SpecialVerdict>,
    /// Monotone evaluation counter for this session
    pub evaluation_cycle: u64,
    /// Total accepted samples at evaluation time
    pub samples_seen: u64,
}

impl RiskAssessment {
    /// Assessment emitted while the session is still collecting.
    pub fn collecting(evaluation_cycle: u64, samples_seen: u64) -> Self {
        Self {
            state: SessionState::Collecting,
            overall_score: None,
            classification: Classification::InsufficientData,
            recommended_action: RecommendedAction::Allow,
            per_factor_scores: BTreeMap::new(),
            reasons: vec!["insufficient data".to_string()],
            special_verdicts: Vec::new(),
            evaluation_cycle,
            samples_seen,
        }
    }
}
