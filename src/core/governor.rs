//! Budget enforcement for generative calls.
//!
//! A `CostGovernor` is owned by exactly one run. It checks three ceilings
//! before every governed call and records actual usage after it:
//! - tokens sent per run
//! - USD per run
//! - USD lifetime, summed fresh from the ledger on every check
//!
//! Once a ceiling trips, the governor is aborted for the rest of the run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::ledger::{Ledger, LedgerError};
use crate::domain::{CostEvent, RunId, RunStats};

/// Characters per token used for estimation. Rounding is always up.
const CHARS_PER_TOKEN: f64 = 3.5;

/// Budget ceilings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetLimits {
    /// Maximum input tokens sent per run (default: 50,000)
    #[serde(default = "default_max_tokens_per_run")]
    pub max_tokens_per_run: u64,

    /// Maximum spend per run in USD (default: 5.00)
    #[serde(default = "default_max_usd_per_run")]
    pub max_usd_per_run: f64,

    /// Maximum spend across all runs in USD (default: 100.00)
    #[serde(default = "default_max_usd_lifetime")]
    pub max_usd_lifetime: f64,
}

fn default_max_tokens_per_run() -> u64 {
    50_000
}
fn default_max_usd_per_run() -> f64 {
    5.0
}
fn default_max_usd_lifetime() -> f64 {
    100.0
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_tokens_per_run: default_max_tokens_per_run(),
            max_usd_per_run: default_max_usd_per_run(),
            max_usd_lifetime: default_max_usd_lifetime(),
        }
    }
}

/// Unit prices of the generative model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    /// Model identifier recorded on cost events
    #[serde(default = "default_model")]
    pub model: String,

    /// USD per 1,000 input tokens
    #[serde(default = "default_input_per_1k")]
    pub input_per_1k: f64,

    /// USD per 1,000 output tokens
    #[serde(default = "default_output_per_1k")]
    pub output_per_1k: f64,
}

fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_input_per_1k() -> f64 {
    0.03
}
fn default_output_per_1k() -> f64 {
    0.06
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            model: default_model(),
            input_per_1k: default_input_per_1k(),
            output_per_1k: default_output_per_1k(),
        }
    }
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_1k + output_tokens as f64 * self.output_per_1k) / 1000.0
    }
}

/// A budget ceiling that a governed call would cross
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BudgetExceeded {
    #[error("MAX_TOKENS_PER_RUN exceeded: {projected} > {limit}")]
    RunTokens { projected: u64, limit: u64 },

    #[error("MAX_USD_PER_RUN exceeded: {projected:.4} > {limit}")]
    RunUsd { projected: f64, limit: f64 },

    #[error("MAX_USD_LIFETIME exceeded: {projected:.4} > {limit}")]
    LifetimeUsd { projected: f64, limit: f64 },
}

/// Governor errors
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    /// The ledger could not be read or written
    #[error("cost ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
}

/// Estimate tokens for a piece of text
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u64
}

/// Per-run budget enforcement over the shared cost ledger
pub struct CostGovernor {
    ledger: Ledger,
    limits: BudgetLimits,
    pricing: Pricing,
    artifacts_dir: PathBuf,
    stats: RunStats,
    abort: Option<BudgetExceeded>,
}

impl CostGovernor {
    /// Create a governor for a fresh run
    pub fn new(ledger: Ledger, limits: BudgetLimits, pricing: Pricing, artifacts_dir: impl Into<PathBuf>) -> Self {
        Self::for_run(RunId::new(), ledger, limits, pricing, artifacts_dir)
    }

    pub fn for_run(
        run_id: RunId,
        ledger: Ledger,
        limits: BudgetLimits,
        pricing: Pricing,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            limits,
            pricing,
            artifacts_dir: artifacts_dir.into(),
            stats: RunStats::new(run_id),
            abort: None,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.stats.run_id
    }

    pub fn model(&self) -> &str {
        &self.pricing.model
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing.cost(input_tokens, output_tokens)
    }

    /// Check all ceilings before a governed call.
    ///
    /// After the first violation every call fails with that same violation,
    /// whatever the estimate.
    pub fn check_before_call(&mut self, estimated_input: u64, estimated_output: u64) -> Result<(), GovernorError> {
        if let Some(exceeded) = &self.abort {
            return Err(exceeded.clone().into());
        }

        let estimated_cost = self.estimate_cost(estimated_input, estimated_output);

        let projected_tokens = self.stats.tokens_sent + estimated_input;
        if projected_tokens > self.limits.max_tokens_per_run {
            return Err(self.trip(BudgetExceeded::RunTokens {
                projected: projected_tokens,
                limit: self.limits.max_tokens_per_run,
            }));
        }

        let projected_run = self.stats.cost_usd + estimated_cost;
        if projected_run > self.limits.max_usd_per_run {
            return Err(self.trip(BudgetExceeded::RunUsd {
                projected: projected_run,
                limit: self.limits.max_usd_per_run,
            }));
        }

        // Never cached: concurrent runs share this ceiling
        let projected_lifetime = self.ledger.lifetime_cost()? + estimated_cost;
        if projected_lifetime > self.limits.max_usd_lifetime {
            return Err(self.trip(BudgetExceeded::LifetimeUsd {
                projected: projected_lifetime,
                limit: self.limits.max_usd_lifetime,
            }));
        }

        Ok(())
    }

    /// Record actual usage of a completed call. Returns its cost.
    pub fn record_usage(&mut self, input_tokens: u64, output_tokens: u64) -> Result<f64, GovernorError> {
        let cost = self.estimate_cost(input_tokens, output_tokens);

        // Persist first so totals never run ahead of the ledger
        self.ledger.append_cost_event(&CostEvent::usage(
            self.stats.run_id,
            input_tokens,
            output_tokens,
            cost,
            self.pricing.model.clone(),
        ))?;

        self.stats.tokens_sent += input_tokens;
        self.stats.tokens_received += output_tokens;
        self.stats.cost_usd += cost;
        Ok(cost)
    }

    /// Sum of every cost ever recorded in the ledger
    pub fn lifetime_cost(&self) -> Result<f64, GovernorError> {
        Ok(self.ledger.lifetime_cost()?)
    }

    pub fn run_stats(&self) -> RunStats {
        self.stats.clone()
    }

    /// Set the sticky abort, persist its markers, and build the error
    fn trip(&mut self, exceeded: BudgetExceeded) -> GovernorError {
        let reason = exceeded.to_string();
        error!(run_id = %self.stats.run_id, %reason, "Budget ceiling reached, aborting run");

        self.abort = Some(exceeded.clone());
        self.stats.aborted = true;
        self.stats.abort_reason = Some(reason.clone());

        if let Err(e) = self.ledger.append_cost_event(&CostEvent::abort(
            self.stats.run_id,
            self.pricing.model.clone(),
            reason,
        )) {
            warn!(error = %e, "Failed to record abort in cost ledger");
        }

        match write_abort_artifact(&self.artifacts_dir, &self.stats) {
            Ok(path) => info!(path = %path.display(), "Wrote abort record"),
            Err(e) => warn!(error = %e, "Failed to write abort record"),
        }

        exceeded.into()
    }
}

fn write_abort_artifact(dir: &Path, stats: &RunStats) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("abort_{}.json", stats.run_id));
    let record = serde_json::json!({
        "run_id": stats.run_id,
        "abort_reason": stats.abort_reason,
        "run_tokens_sent": stats.tokens_sent,
        "run_tokens_received": stats.tokens_received,
        "run_cost": stats.cost_usd,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    let content = serde_json::to_string_pretty(&record)?;
    std::fs::write(&path, content)?;
    Ok(path)
}
