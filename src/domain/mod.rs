//! Domain types for the autopilot pipeline.
//!
//! This module contains the plain data records:
//! - Candidate: Normalized ingested item
//! - StageOutcome: One stage transition of one candidate
//! - CostEvent: One governed generative call
//! - AuditEntry: One governance-relevant event
//! - SalesSnapshot: One fetch of storefront sales data
//! - Evaluation/ProductSpec/Verdict/Listing: Typed generative outputs
//! - Run: Run identity, candidate state and reports

pub mod audit;
pub mod candidate;
pub mod cost;
pub mod outcome;
pub mod product;
pub mod run;
pub mod sales;

// Re-export commonly used types
pub use audit::{AuditAction, AuditEntry};
pub use candidate::Candidate;
pub use cost::{CostEvent, RunCostSummary};
pub use outcome::{OutcomeStatus, Stage, StageOutcome};
pub use product::{Evaluation, Listing, ListingError, ProductSpec, Verdict};
pub use run::{CandidateState, RetryStats, RunId, RunReport, RunStats};
pub use sales::{normalize_product_name, FeedbackSummary, PublishedProduct, SalesSnapshot, SuppressionDecision};
