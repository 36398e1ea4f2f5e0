//! Adapter interfaces for external systems.
//!
//! The pipeline talks to three kinds of collaborators: content sources, the
//! generative text service, and the storefront. Each is a trait here so the
//! orchestrator can run against real HTTP clients or in-process mocks.

pub mod gumroad;
pub mod openai;
pub mod sources;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::governor::{BudgetExceeded, GovernorError};
use crate::core::ledger::LedgerError;
use crate::domain::{Candidate, Listing};

// Re-export the concrete clients
pub use gumroad::GumroadClient;
pub use openai::OpenAiClient;
pub use sources::{build_sources, FileSource, HackerNewsSource, SourceKind};

/// Failure of an external or governed call.
///
/// Timeouts, connection failures, low-level I/O and 429/5xx responses are
/// transient. Everything else is fatal.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// Whether retrying the same call could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Io(_) | Self::Unavailable { .. }
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || status >= 500 {
            Self::Unavailable { status, message }
        } else {
            Self::Rejected { status, message }
        }
    }

    /// Short name of the failure kind, for error records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::Io(_) => "io",
            Self::Unavailable { .. } => "unavailable",
            Self::Rejected { .. } => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Budget(_) => "budget_exceeded",
            Self::Ledger(_) => "ledger",
            Self::Other(_) => "other",
        }
    }

    pub fn as_budget(&self) -> Option<&BudgetExceeded> {
        match self {
            Self::Budget(exceeded) => Some(exceeded),
            _ => None,
        }
    }
}

impl From<GovernorError> for CallError {
    fn from(err: GovernorError) -> Self {
        match err {
            GovernorError::BudgetExceeded(exceeded) => Self::Budget(exceeded),
            GovernorError::Ledger(e) => Self::Ledger(e),
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            Self::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Token usage reported by the generative service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A generative result with its actual usage
#[derive(Debug, Clone)]
pub struct Generation<T> {
    pub output: T,
    pub usage: Usage,
}

/// Storefront response to a created listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListingReceipt {
    pub id: String,
    pub url: Option<String>,
}

/// Sales metrics for one storefront product
#[derive(Debug, Clone, PartialEq)]
pub struct SalesRecord {
    pub product_id: String,
    pub product_name: String,
    pub sales_count: u64,
    pub revenue_cents: u64,
    pub views: u64,
    pub refunds: u64,
}

/// A content source producing normalized candidates
#[async_trait]
pub trait Source: Send + Sync {
    /// Source tag recorded on every candidate
    fn name(&self) -> &str;

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, CallError>;
}

/// Generative text service
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier recorded on cost events
    fn model(&self) -> &str;

    /// Generate in JSON mode. The raw reply is returned unparsed so usage
    /// can be charged even when the content turns out not to be JSON.
    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_input: &str,
        max_tokens: u32,
    ) -> Result<Generation<String>, CallError>;

    /// Generate free text
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_input: &str,
        max_tokens: u32,
    ) -> Result<Generation<String>, CallError>;
}

/// Storefront API
#[async_trait]
pub trait Storefront: Send + Sync {
    fn name(&self) -> &str;

    async fn create_listing(&self, listing: &Listing) -> Result<ListingReceipt, CallError>;

    async fn fetch_sales_data(&self) -> Result<Vec<SalesRecord>, CallError>;
}
