//! Audit trail entries.
//!
//! Audit entries are immutable records of governance-relevant events. The
//! set of actions is closed: anything outside [`AuditAction`] is not a valid
//! audit record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::RunId;

/// Closed vocabulary of auditable actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RunStarted,
    RunFinished,
    PostIngested,
    ProblemExtracted,
    PostDiscarded,
    SpecGenerated,
    SpecRejected,
    ContentGenerated,
    ContentVerified,
    ContentRejected,
    ListingCreated,
    ProductPublished,
    CostLimitExceeded,
    ErrorOccurred,
    PublishingSuppressed,
    SalesDataIngested,
}

impl AuditAction {
    pub const ALL: [AuditAction; 16] = [
        AuditAction::RunStarted,
        AuditAction::RunFinished,
        AuditAction::PostIngested,
        AuditAction::ProblemExtracted,
        AuditAction::PostDiscarded,
        AuditAction::SpecGenerated,
        AuditAction::SpecRejected,
        AuditAction::ContentGenerated,
        AuditAction::ContentVerified,
        AuditAction::ContentRejected,
        AuditAction::ListingCreated,
        AuditAction::ProductPublished,
        AuditAction::CostLimitExceeded,
        AuditAction::ErrorOccurred,
        AuditAction::PublishingSuppressed,
        AuditAction::SalesDataIngested,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::RunFinished => "run_finished",
            Self::PostIngested => "post_ingested",
            Self::ProblemExtracted => "problem_extracted",
            Self::PostDiscarded => "post_discarded",
            Self::SpecGenerated => "spec_generated",
            Self::SpecRejected => "spec_rejected",
            Self::ContentGenerated => "content_generated",
            Self::ContentVerified => "content_verified",
            Self::ContentRejected => "content_rejected",
            Self::ListingCreated => "listing_created",
            Self::ProductPublished => "product_published",
            Self::CostLimitExceeded => "cost_limit_exceeded",
            Self::ErrorOccurred => "error_occurred",
            Self::PublishingSuppressed => "publishing_suppressed",
            Self::SalesDataIngested => "sales_data_ingested",
        }
    }

    /// Human-readable description used in timelines
    pub fn description(self) -> &'static str {
        match self {
            Self::RunStarted => "Pipeline run started",
            Self::RunFinished => "Pipeline run finished",
            Self::PostIngested => "Candidate fetched and stored",
            Self::ProblemExtracted => "Problem evaluation completed",
            Self::PostDiscarded => "Candidate discarded",
            Self::SpecGenerated => "Product spec created",
            Self::SpecRejected => "Product spec rejected",
            Self::ContentGenerated => "Product content drafted",
            Self::ContentVerified => "Content passed verification",
            Self::ContentRejected => "Content failed verification",
            Self::ListingCreated => "Storefront listing text created",
            Self::ProductPublished => "Product published to storefront",
            Self::CostLimitExceeded => "Cost limit reached",
            Self::ErrorOccurred => "Error during processing",
            Self::PublishingSuppressed => "Publishing suppressed due to performance",
            Self::SalesDataIngested => "Sales data fetched from storefront",
        }
    }

    /// Parse an action name; `None` for anything outside the vocabulary
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier, stable across exports
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub action: AuditAction,

    pub candidate_id: Option<String>,

    pub run_id: Option<RunId>,

    /// Structured detail payload
    pub details: Option<serde_json::Value>,

    pub error: bool,

    pub cost_limit: bool,
}

impl AuditEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            candidate_id: None,
            run_id: None,
            details: None,
            error: action == AuditAction::ErrorOccurred,
            cost_limit: action == AuditAction::CostLimitExceeded,
        }
    }

    pub fn for_candidate(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = Some(candidate_id.into());
        self
    }

    pub fn for_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Flag as an error regardless of action
    pub fn flagged_error(mut self) -> Self {
        self.error = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_is_closed() {
        assert_eq!(AuditAction::parse("post_ingested"), Some(AuditAction::PostIngested));
        assert_eq!(AuditAction::parse("post_ingestd"), None);
        assert_eq!(AuditAction::parse(""), None);
    }

    #[test]
    fn test_every_action_round_trips() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
            assert!(!action.description().is_empty());
        }
    }
}
