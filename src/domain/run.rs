//! Run identity, per-candidate state, and end-of-run reporting.
//!
//! A run is one execution of the orchestrator over the unprocessed candidate
//! set. It is never persisted as a single row: its identity tags every cost
//! event and audit entry, and its totals live in the run's cost governor.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::OutcomeStatus;

static LAST_RUN_ID: AtomicI64 = AtomicI64::new(0);

/// Monotonic, time-derived run identifier (unix milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    /// Allocate a new id, strictly greater than any previously allocated in
    /// this process
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        let mut last = LAST_RUN_ID.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match LAST_RUN_ID.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Self(next),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Wall-clock time the id was derived from
    pub fn started_at(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.0).single().unwrap_or_default()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Read-only snapshot of a run's totals and abort state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: RunId,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub cost_usd: f64,
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

impl RunStats {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            tokens_sent: 0,
            tokens_received: 0,
            cost_usd: 0.0,
            aborted: false,
            abort_reason: None,
        }
    }
}

/// Where one candidate ended up in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CandidateState {
    Published,

    /// Not worth pursuing: not monetizable, or verification never passed
    Discarded { reason: String },

    /// A generative step declined the candidate
    Rejected { reason: String },

    /// A system error ended processing for this candidate
    Failed { error: String },

    /// A budget ceiling tripped while this candidate was active
    CostLimitExceeded,
}

impl CandidateState {
    /// Status of the stage outcome that ends the candidate in this state
    pub fn outcome_status(&self) -> OutcomeStatus {
        match self {
            Self::Published => OutcomeStatus::Completed,
            Self::Discarded { .. } => OutcomeStatus::Discarded,
            Self::Rejected { .. } => OutcomeStatus::Rejected,
            Self::Failed { .. } => OutcomeStatus::Failed,
            Self::CostLimitExceeded => OutcomeStatus::CostLimitExceeded,
        }
    }
}

/// Aggregate retry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Every invocation of a wrapped operation, first tries included
    pub total_attempts: u64,

    /// Operations that succeeded after at least one retry
    pub successful_retries: u64,

    /// Operations that gave up (exhausted or fatal)
    pub failed_operations: u64,
}

impl RetryStats {
    /// Share of retried operations that eventually succeeded
    pub fn success_rate(&self) -> f64 {
        let retried = self.successful_retries + self.failed_operations;
        if retried == 0 {
            return 0.0;
        }
        self.successful_retries as f64 / retried as f64
    }
}

/// End-of-run report, produced however the run ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stats: RunStats,
    pub lifetime_cost_usd: f64,
    pub finished_at: DateTime<Utc>,

    pub ingested: u64,
    pub processed: u64,
    pub published: u64,
    pub discarded: u64,
    pub rejected: u64,
    pub failed: u64,

    /// Suppression reason when publishing was suppressed for this run
    pub suppressed: Option<String>,

    /// Kill switch was set; nothing ran
    pub killed: bool,

    /// Cancelled between candidates
    pub interrupted: bool,

    pub retry: RetryStats,
}

impl RunReport {
    pub fn new(stats: RunStats) -> Self {
        Self {
            stats,
            lifetime_cost_usd: 0.0,
            finished_at: Utc::now(),
            ingested: 0,
            processed: 0,
            published: 0,
            discarded: 0,
            rejected: 0,
            failed: 0,
            suppressed: None,
            killed: false,
            interrupted: false,
            retry: RetryStats::default(),
        }
    }

    /// Count one candidate's terminal state
    pub fn tally(&mut self, state: &CandidateState) {
        self.processed += 1;
        match state {
            CandidateState::Published => self.published += 1,
            CandidateState::Discarded { .. } => self.discarded += 1,
            CandidateState::Rejected { .. } => self.rejected += 1,
            CandidateState::Failed { .. } | CandidateState::CostLimitExceeded => self.failed += 1,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.stats.run_id)?;
        if self.killed {
            writeln!(f, "  Kill switch active, nothing processed")?;
        }
        writeln!(f, "  Tokens sent:     {}", self.stats.tokens_sent)?;
        writeln!(f, "  Tokens received: {}", self.stats.tokens_received)?;
        writeln!(f, "  Run cost:        ${:.4}", self.stats.cost_usd)?;
        writeln!(f, "  Lifetime cost:   ${:.4}", self.lifetime_cost_usd)?;
        writeln!(
            f,
            "  Candidates:      {} ingested, {} processed ({} published, {} discarded, {} rejected, {} failed)",
            self.ingested, self.processed, self.published, self.discarded, self.rejected, self.failed
        )?;
        writeln!(
            f,
            "  Retries:         {} attempts, {:.0}% retry success",
            self.retry.total_attempts,
            self.retry.success_rate() * 100.0
        )?;
        if let Some(reason) = &self.suppressed {
            writeln!(f, "  Publishing suppressed: {}", reason)?;
        }
        if self.interrupted {
            writeln!(f, "  Interrupted")?;
        }
        match &self.stats.abort_reason {
            Some(reason) => writeln!(f, "  Aborted: {}", reason),
            None => writeln!(f, "  Aborted: no"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_monotonic() {
        let ids: Vec<RunId> = (0..100).map(|_| RunId::new()).collect();
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_run_id_parse_and_display() {
        let id: RunId = "1700000000000".parse().unwrap();
        assert_eq!(id.as_i64(), 1_700_000_000_000);
        assert_eq!(id.to_string(), "1700000000000");
        assert!("abc".parse::<RunId>().is_err());
    }

    #[test]
    fn test_state_outcome_status() {
        assert_eq!(CandidateState::Published.outcome_status(), OutcomeStatus::Completed);
        assert_eq!(
            CandidateState::CostLimitExceeded.outcome_status(),
            OutcomeStatus::CostLimitExceeded
        );
        assert_eq!(
            CandidateState::Discarded { reason: "verification_failed".into() }.outcome_status(),
            OutcomeStatus::Discarded
        );
    }

    #[test]
    fn test_retry_success_rate() {
        let stats = RetryStats {
            total_attempts: 10,
            successful_retries: 3,
            failed_operations: 1,
        };
        assert!((stats.success_rate() - 0.75).abs() < 1e-9);
        assert_eq!(RetryStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_report_tally() {
        let mut report = RunReport::new(RunStats::new(RunId::new()));
        report.tally(&CandidateState::Published);
        report.tally(&CandidateState::Rejected { reason: "low confidence".into() });
        report.tally(&CandidateState::CostLimitExceeded);
        assert_eq!(report.processed, 3);
        assert_eq!(report.published, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.failed, 1);
        assert!(report.to_string().contains("Aborted: no"));
    }
}
