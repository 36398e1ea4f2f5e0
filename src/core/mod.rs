//! Core orchestration and governance.
//!
//! This module contains:
//! - Ledger: SQLite-backed durable state
//! - Retry: Per-category backoff policies
//! - Governor: Token and USD budget enforcement
//! - Audit: Immutable audit trail
//! - Feedback: Sales-driven publishing suppression
//! - Orchestrator: Main execution engine

pub mod artifacts;
pub mod audit;
pub mod feedback;
pub mod governor;
pub mod ledger;
pub mod orchestrator;
pub mod retry;
pub mod stages;

// Re-export commonly used types
pub use artifacts::{hash_content, ArtifactStore};
pub use audit::AuditLogger;
pub use feedback::{FeedbackSettings, IngestResult, SalesFeedback};
pub use governor::{estimate_tokens, BudgetExceeded, BudgetLimits, CostGovernor, GovernorError, Pricing};
pub use ledger::{Ledger, LedgerError};
pub use orchestrator::{Orchestrator, PipelineOptions, Services};
pub use retry::{RetryCategory, RetryHandler, RetryPolicy, RetrySettings};
pub use stages::{spec_rejection, StageRunner};
