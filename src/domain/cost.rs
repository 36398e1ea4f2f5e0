//! Cost events: one row per governed generative call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::RunId;

/// A governed call's usage, or a zero-usage abort marker (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    pub run_id: RunId,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub usd_cost: f64,
    pub timestamp: DateTime<Utc>,
    pub model: String,

    /// Set only on the marker row written when a budget ceiling trips
    pub abort_reason: Option<String>,
}

impl CostEvent {
    /// Usage of a completed call
    pub fn usage(
        run_id: RunId,
        tokens_sent: u64,
        tokens_received: u64,
        usd_cost: f64,
        model: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            tokens_sent,
            tokens_received,
            usd_cost,
            timestamp: Utc::now(),
            model: model.into(),
            abort_reason: None,
        }
    }

    /// Zero-usage marker carrying the abort reason
    pub fn abort(run_id: RunId, model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            tokens_sent: 0,
            tokens_received: 0,
            usd_cost: 0.0,
            timestamp: Utc::now(),
            model: model.into(),
            abort_reason: Some(reason.into()),
        }
    }
}

/// Aggregated cost events for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCostSummary {
    pub run_id: RunId,
    pub calls: u64,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub usd_cost: f64,
    pub started_at: DateTime<Utc>,
    pub abort_reason: Option<String>,
}
