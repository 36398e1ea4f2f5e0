//! Immutable audit trail over the ledger.
//!
//! The logger only appends and reads. There is no update or delete.

use chrono::SecondsFormat;
use tracing::{error, warn};

use super::ledger::{Ledger, LedgerError};
use crate::domain::{AuditAction, AuditEntry, RunId};

/// Typed recorder and reader of audit entries
#[derive(Clone)]
pub struct AuditLogger {
    ledger: Ledger,
}

impl AuditLogger {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Log an action by name.
    ///
    /// Returns false without writing anything when `action` is outside the
    /// audit vocabulary, or when the write fails.
    pub fn log(
        &self,
        action: &str,
        candidate_id: Option<&str>,
        run_id: Option<RunId>,
        details: Option<serde_json::Value>,
        error: bool,
        cost_limit: bool,
    ) -> bool {
        let Some(action) = AuditAction::parse(action) else {
            warn!(action, "Rejected unknown audit action");
            return false;
        };

        let mut entry = AuditEntry::new(action);
        entry.candidate_id = candidate_id.map(str::to_string);
        entry.run_id = run_id;
        entry.details = details;
        entry.error |= error;
        entry.cost_limit |= cost_limit;
        self.record(entry)
    }

    /// Append a typed entry. Returns false when the write fails.
    pub fn record(&self, entry: AuditEntry) -> bool {
        match self.ledger.append_audit_entry(&entry) {
            Ok(()) => true,
            Err(e) => {
                error!(action = %entry.action, error = %e, "Audit log write failed");
                false
            }
        }
    }

    /// Entries for one candidate, oldest first
    pub fn get_candidate_history(&self, candidate_id: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ledger.audit_for_candidate(candidate_id)
    }

    /// Entries for one run, oldest first
    pub fn get_run_history(&self, run_id: RunId) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ledger.audit_for_run(run_id)
    }

    /// Most recent entries with one action, newest first
    pub fn get_action_history(&self, action: AuditAction, limit: usize) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ledger.audit_by_action(action, limit)
    }

    /// Most recent error and cost-limit entries, newest first
    pub fn get_recent_errors(&self, limit: usize) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ledger.recent_audit_errors(limit)
    }

    /// Human-readable timeline of one candidate
    pub fn get_timeline(&self, candidate_id: &str) -> Result<String, LedgerError> {
        let history = self.get_candidate_history(candidate_id)?;
        if history.is_empty() {
            return Ok("No audit history found.".to_string());
        }

        let mut lines = vec![format!("Timeline for candidate {}:", candidate_id)];
        for entry in &history {
            let mut line = format!(
                "  {} - {}",
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                entry.action.description()
            );
            if let Some(reason) = entry
                .details
                .as_ref()
                .and_then(|d| d.get("reason").or_else(|| d.get("error")))
                .and_then(|v| v.as_str())
            {
                line.push_str(&format!(" ({})", reason));
            }
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}
