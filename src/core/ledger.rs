//! SQLite-backed ledger for candidates, cost events, stage outcomes, audit
//! entries, and sales data.
//!
//! Every stream is append-only: the store exposes inserts and reads, never
//! updates or deletes. Candidate insertion is insert-if-absent.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AuditAction, AuditEntry, Candidate, CostEvent, OutcomeStatus, PublishedProduct, RunCostSummary,
    RunId, SalesSnapshot, Stage, StageOutcome,
};

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// Append-only ledger over a single SQLite database
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    /// Open (or create) the ledger at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA busy_timeout=5000;",
        )?;
        Self::from_connection(conn)
    }

    /// In-memory ledger, for tests and dry experiments
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection. A poisoned lock is recovered: the connection
    /// holds no in-process invariants a panic could break.
    fn with_conn<F, R>(&self, f: F) -> Result<R, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<R, LedgerError>,
    {
        let guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    fn create_tables(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS candidates (
                id            TEXT PRIMARY KEY,
                title         TEXT NOT NULL,
                body          TEXT NOT NULL DEFAULT '',
                score         INTEGER NOT NULL DEFAULT 0,
                url           TEXT NOT NULL DEFAULT '',
                source        TEXT NOT NULL,
                author        TEXT NOT NULL DEFAULT '',
                created_utc   INTEGER NOT NULL,
                num_comments  INTEGER NOT NULL DEFAULT 0,
                ingested_at   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cost_events (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id           INTEGER NOT NULL,
                tokens_sent      INTEGER NOT NULL,
                tokens_received  INTEGER NOT NULL,
                usd_cost         REAL NOT NULL,
                ts               INTEGER NOT NULL,
                model            TEXT NOT NULL,
                abort_reason     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_cost_events_run ON cost_events(run_id);

            CREATE TABLE IF NOT EXISTS stage_outcomes (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                candidate_id   TEXT NOT NULL,
                stage          TEXT NOT NULL,
                status         TEXT NOT NULL,
                artifact_ref   TEXT,
                error_message  TEXT,
                ts             INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stage_outcomes_candidate ON stage_outcomes(candidate_id);

            CREATE TABLE IF NOT EXISTS audit_log (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid             TEXT NOT NULL UNIQUE,
                ts               INTEGER NOT NULL,
                action           TEXT NOT NULL,
                candidate_id     TEXT,
                run_id           INTEGER,
                details_json     TEXT,
                error_flag       INTEGER NOT NULL DEFAULT 0,
                cost_limit_flag  INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_audit_candidate ON audit_log(candidate_id);
            CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_log(run_id);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_log(action);

            CREATE TABLE IF NOT EXISTS sales_snapshots (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id     TEXT NOT NULL,
                product_name   TEXT NOT NULL,
                sales_count    INTEGER NOT NULL,
                revenue_cents  INTEGER NOT NULL,
                views          INTEGER NOT NULL,
                refunds        INTEGER NOT NULL,
                fetched_at     INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sales_fetched ON sales_snapshots(fetched_at);

            CREATE TABLE IF NOT EXISTS published_products (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                candidate_id   TEXT NOT NULL,
                product_id     TEXT NOT NULL,
                product_name   TEXT NOT NULL,
                product_url    TEXT,
                published_at   INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Candidates
    // -------------------------------------------------------------------------

    /// Store a candidate unless one with the same id exists. Returns true when
    /// the candidate is new.
    pub fn insert_candidate(&self, candidate: &Candidate) -> Result<bool, LedgerError> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO candidates
                 (id, title, body, score, url, source, author, created_utc, num_comments, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    candidate.id,
                    candidate.title,
                    candidate.body,
                    candidate.score,
                    candidate.url,
                    candidate.source,
                    candidate.author,
                    candidate.created_at.timestamp_millis(),
                    candidate.num_comments,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_candidate(&self, id: &str) -> Result<Option<Candidate>, LedgerError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT id, title, body, score, url, source, author, created_utc, num_comments
                     FROM candidates WHERE id = ?1",
                    params![id],
                    row_to_raw_candidate,
                )
                .optional()?;
            raw.map(RawCandidate::into_candidate).transpose()
        })
    }

    /// Candidates without a completed outcome at any stage past ingestion,
    /// newest first.
    ///
    /// Computed as an anti-join over the outcome stream on every call, never
    /// from a stored flag.
    pub fn unprocessed_candidates(&self) -> Result<Vec<Candidate>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.title, c.body, c.score, c.url, c.source, c.author, c.created_utc, c.num_comments
                 FROM candidates c
                 LEFT JOIN (
                     SELECT DISTINCT candidate_id FROM stage_outcomes
                     WHERE status = ?1 AND stage != ?2
                 ) done ON done.candidate_id = c.id
                 WHERE done.candidate_id IS NULL
                 ORDER BY c.created_utc DESC, c.rowid ASC",
            )?;
            let rows = stmt.query_map(
                params![OutcomeStatus::Completed.as_str(), Stage::Ingestion.as_str()],
                row_to_raw_candidate,
            )?;
            rows.map(|row| -> Result<Candidate, LedgerError> { row?.into_candidate() })
                .collect()
        })
    }

    pub fn candidate_count(&self) -> Result<u64, LedgerError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM candidates", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    // -------------------------------------------------------------------------
    // Cost events
    // -------------------------------------------------------------------------

    pub fn append_cost_event(&self, event: &CostEvent) -> Result<(), LedgerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cost_events
                 (run_id, tokens_sent, tokens_received, usd_cost, ts, model, abort_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.run_id.as_i64(),
                    event.tokens_sent as i64,
                    event.tokens_received as i64,
                    event.usd_cost,
                    event.timestamp.timestamp_millis(),
                    event.model,
                    event.abort_reason,
                ],
            )?;
            Ok(())
        })
    }

    /// Sum of every recorded cost, across all runs
    pub fn lifetime_cost(&self) -> Result<f64, LedgerError> {
        self.with_conn(|conn| {
            let total: f64 = conn.query_row(
                "SELECT COALESCE(SUM(usd_cost), 0.0) FROM cost_events",
                [],
                |row| row.get(0),
            )?;
            Ok(total)
        })
    }

    pub fn cost_events_for_run(&self, run_id: RunId) -> Result<Vec<CostEvent>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, tokens_sent, tokens_received, usd_cost, ts, model, abort_reason
                 FROM cost_events WHERE run_id = ?1 ORDER BY ts ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![run_id.as_i64()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?;
            rows.map(|row| -> Result<CostEvent, LedgerError> {
                let (run_id, sent, received, cost, ts, model, abort_reason) = row?;
                Ok(CostEvent {
                    run_id: RunId::from_raw(run_id),
                    tokens_sent: sent.max(0) as u64,
                    tokens_received: received.max(0) as u64,
                    usd_cost: cost,
                    timestamp: from_millis(ts)?,
                    model,
                    abort_reason,
                })
            })
            .collect()
        })
    }

    /// Per-run cost totals, most recent run first
    pub fn run_cost_summaries(&self, limit: usize) -> Result<Vec<RunCostSummary>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id,
                        SUM(CASE WHEN abort_reason IS NULL THEN 1 ELSE 0 END),
                        SUM(tokens_sent), SUM(tokens_received), SUM(usd_cost),
                        MIN(ts), MAX(abort_reason)
                 FROM cost_events
                 GROUP BY run_id
                 ORDER BY run_id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?;
            rows.map(|row| -> Result<RunCostSummary, LedgerError> {
                let (run_id, calls, sent, received, cost, started, abort_reason) = row?;
                Ok(RunCostSummary {
                    run_id: RunId::from_raw(run_id),
                    calls: calls.max(0) as u64,
                    tokens_sent: sent.max(0) as u64,
                    tokens_received: received.max(0) as u64,
                    usd_cost: cost,
                    started_at: from_millis(started)?,
                    abort_reason,
                })
            })
            .collect()
        })
    }

    // -------------------------------------------------------------------------
    // Stage outcomes
    // -------------------------------------------------------------------------

    pub fn append_stage_outcome(&self, outcome: &StageOutcome) -> Result<(), LedgerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stage_outcomes (candidate_id, stage, status, artifact_ref, error_message, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    outcome.candidate_id,
                    outcome.stage.as_str(),
                    outcome.status.as_str(),
                    outcome.artifact_ref,
                    outcome.error_message,
                    outcome.timestamp.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
    }

    /// Outcomes for one candidate, in the order they were recorded
    pub fn stage_outcomes_for(&self, candidate_id: &str) -> Result<Vec<StageOutcome>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT candidate_id, stage, status, artifact_ref, error_message, ts
                 FROM stage_outcomes WHERE candidate_id = ?1 ORDER BY ts ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![candidate_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;
            rows.map(|row| -> Result<StageOutcome, LedgerError> {
                let (candidate_id, stage, status, artifact_ref, error_message, ts) = row?;
                Ok(StageOutcome {
                    candidate_id,
                    stage: Stage::parse(&stage)
                        .ok_or_else(|| LedgerError::Corrupt(format!("unknown stage '{}'", stage)))?,
                    status: OutcomeStatus::parse(&status)
                        .ok_or_else(|| LedgerError::Corrupt(format!("unknown status '{}'", status)))?,
                    artifact_ref,
                    error_message,
                    timestamp: from_millis(ts)?,
                })
            })
            .collect()
        })
    }

    // -------------------------------------------------------------------------
    // Audit log
    // -------------------------------------------------------------------------

    pub fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), LedgerError> {
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log
                 (uuid, ts, action, candidate_id, run_id, details_json, error_flag, cost_limit_flag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id.to_string(),
                    entry.timestamp.timestamp_millis(),
                    entry.action.as_str(),
                    entry.candidate_id,
                    entry.run_id.map(RunId::as_i64),
                    details,
                    entry.error,
                    entry.cost_limit,
                ],
            )?;
            Ok(())
        })
    }

    /// Entries for one candidate, oldest first
    pub fn audit_for_candidate(&self, candidate_id: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        self.query_audit(
            "WHERE candidate_id = ?1 ORDER BY ts ASC, id ASC",
            params![candidate_id],
        )
    }

    /// Entries for one run, oldest first
    pub fn audit_for_run(&self, run_id: RunId) -> Result<Vec<AuditEntry>, LedgerError> {
        self.query_audit(
            "WHERE run_id = ?1 ORDER BY ts ASC, id ASC",
            params![run_id.as_i64()],
        )
    }

    /// Most recent entries with the given action
    pub fn audit_by_action(&self, action: AuditAction, limit: usize) -> Result<Vec<AuditEntry>, LedgerError> {
        self.query_audit(
            "WHERE action = ?1 ORDER BY ts DESC, id DESC LIMIT ?2",
            params![action.as_str(), limit as i64],
        )
    }

    /// Most recent entries flagged as errors or cost-limit hits
    pub fn recent_audit_errors(&self, limit: usize) -> Result<Vec<AuditEntry>, LedgerError> {
        self.query_audit(
            "WHERE error_flag = 1 OR cost_limit_flag = 1 ORDER BY ts DESC, id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    fn query_audit(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let sql = format!(
            "SELECT uuid, ts, action, candidate_id, run_id, details_json, error_flag, cost_limit_flag
             FROM audit_log {}",
            clause
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, bool>(6)?,
                    row.get::<_, bool>(7)?,
                ))
            })?;
            rows.map(|row| -> Result<AuditEntry, LedgerError> {
                let (uuid, ts, action, candidate_id, run_id, details, error, cost_limit) = row?;
                Ok(AuditEntry {
                    id: Uuid::parse_str(&uuid)
                        .map_err(|e| LedgerError::Corrupt(format!("bad audit uuid '{}': {}", uuid, e)))?,
                    timestamp: from_millis(ts)?,
                    action: AuditAction::parse(&action)
                        .ok_or_else(|| LedgerError::Corrupt(format!("unknown audit action '{}'", action)))?,
                    candidate_id,
                    run_id: run_id.map(RunId::from_raw),
                    details: details
                        .as_deref()
                        .map(serde_json::from_str::<serde_json::Value>)
                        .transpose()?,
                    error,
                    cost_limit,
                })
            })
            .collect()
        })
    }

    // -------------------------------------------------------------------------
    // Sales
    // -------------------------------------------------------------------------

    pub fn append_sales_snapshot(&self, snapshot: &SalesSnapshot) -> Result<(), LedgerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sales_snapshots
                 (product_id, product_name, sales_count, revenue_cents, views, refunds, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    snapshot.product_id,
                    snapshot.product_name,
                    snapshot.sales_count as i64,
                    snapshot.revenue_cents as i64,
                    snapshot.views as i64,
                    snapshot.refunds as i64,
                    snapshot.fetched_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
    }

    /// Snapshots fetched at or after `since`, oldest first
    pub fn sales_snapshots_since(&self, since: DateTime<Utc>) -> Result<Vec<SalesSnapshot>, LedgerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT product_id, product_name, sales_count, revenue_cents, views, refunds, fetched_at
                 FROM sales_snapshots WHERE fetched_at >= ?1 ORDER BY fetched_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![since.timestamp_millis()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?;
            rows.map(|row| -> Result<SalesSnapshot, LedgerError> {
                let (product_id, product_name, sales, revenue, views, refunds, fetched_at) = row?;
                Ok(SalesSnapshot {
                    product_id,
                    product_name,
                    sales_count: sales.max(0) as u64,
                    revenue_cents: revenue.max(0) as u64,
                    views: views.max(0) as u64,
                    refunds: refunds.max(0) as u64,
                    fetched_at: from_millis(fetched_at)?,
                })
            })
            .collect()
        })
    }

    pub fn record_published_product(&self, product: &PublishedProduct) -> Result<(), LedgerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO published_products
                 (candidate_id, product_id, product_name, product_url, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    product.candidate_id,
                    product.product_id,
                    product.product_name,
                    product.product_url,
                    product.published_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
    }

    /// Products published at or after `since`, newest first
    pub fn published_products_since(&self, since: DateTime<Utc>) -> Result<Vec<PublishedProduct>, LedgerError> {
        self.query_published(
            "WHERE published_at >= ?1 ORDER BY published_at DESC, id DESC",
            params![since.timestamp_millis()],
        )
    }

    /// The `limit` most recently published products, newest first
    pub fn recent_published_products(&self, limit: usize) -> Result<Vec<PublishedProduct>, LedgerError> {
        self.query_published(
            "ORDER BY published_at DESC, id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    fn query_published(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PublishedProduct>, LedgerError> {
        let sql = format!(
            "SELECT candidate_id, product_id, product_name, product_url, published_at
             FROM published_products {}",
            clause
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            rows.map(|row| -> Result<PublishedProduct, LedgerError> {
                let (candidate_id, product_id, product_name, product_url, published_at) = row?;
                Ok(PublishedProduct {
                    candidate_id,
                    product_id,
                    product_name,
                    product_url,
                    published_at: from_millis(published_at)?,
                })
            })
            .collect()
        })
    }
}

struct RawCandidate {
    id: String,
    title: String,
    body: String,
    score: i64,
    url: String,
    source: String,
    author: String,
    created_utc: i64,
    num_comments: i64,
}

impl RawCandidate {
    fn into_candidate(self) -> Result<Candidate, LedgerError> {
        Ok(Candidate {
            id: self.id,
            title: self.title,
            body: self.body,
            score: self.score,
            url: self.url,
            source: self.source,
            author: self.author,
            created_at: from_millis(self.created_utc)?,
            num_comments: self.num_comments,
        })
    }
}

fn row_to_raw_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCandidate> {
    Ok(RawCandidate {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        score: row.get(3)?,
        url: row.get(4)?,
        source: row.get(5)?,
        author: row.get(6)?,
        created_utc: row.get(7)?,
        num_comments: row.get(8)?,
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, LedgerError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| LedgerError::Corrupt(format!("timestamp out of range: {}", ms)))
}
