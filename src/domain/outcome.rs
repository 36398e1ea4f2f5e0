//! Stage outcomes: one row per transition of one candidate.
//!
//! A candidate's position in the pipeline is never stored directly; it is
//! derived from its outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Evaluation,
    Specification,
    Drafting,
    Verification,
    Listing,
    Publishing,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Ingestion,
        Stage::Evaluation,
        Stage::Specification,
        Stage::Drafting,
        Stage::Verification,
        Stage::Listing,
        Stage::Publishing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Evaluation => "evaluation",
            Self::Specification => "specification",
            Self::Drafting => "drafting",
            Self::Verification => "verification",
            Self::Listing => "listing",
            Self::Publishing => "publishing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Stage finished and the candidate advances
    Completed,

    /// A generative step declined the candidate
    Rejected,

    /// The candidate is not worth pursuing (not monetizable, failed verification)
    Discarded,

    /// A system error ended processing for this candidate
    Failed,

    /// A budget ceiling was hit while this candidate was active
    CostLimitExceeded,
}

impl OutcomeStatus {
    pub const ALL: [OutcomeStatus; 5] = [
        OutcomeStatus::Completed,
        OutcomeStatus::Rejected,
        OutcomeStatus::Discarded,
        OutcomeStatus::Failed,
        OutcomeStatus::CostLimitExceeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Discarded => "discarded",
            Self::Failed => "failed",
            Self::CostLimitExceeded => "cost_limit_exceeded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transition of one candidate through the pipeline (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub candidate_id: String,
    pub stage: Stage,
    pub status: OutcomeStatus,

    /// Path of the artifact written by this stage, if any
    pub artifact_ref: Option<String>,

    /// Error or rejection reason, if any
    pub error_message: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl StageOutcome {
    pub fn new(candidate_id: impl Into<String>, stage: Stage, status: OutcomeStatus) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            stage,
            status,
            artifact_ref: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_artifact(mut self, artifact_ref: impl Into<String>) -> Self {
        self.artifact_ref = Some(artifact_ref.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}
