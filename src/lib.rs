//! autopilot - Governed content-to-product pipeline
//!
//! Turns discussion posts into published digital products: ingest
//! candidates, evaluate and specify them with a generative service, draft
//! and verify content, write a listing, and publish it to a storefront.
//!
//! # Architecture
//!
//! Every fact the pipeline learns is appended to a SQLite ledger:
//! - Stage outcomes record each candidate's progress; its state is derived
//! - Cost events back the per-run and lifetime budget ceilings
//! - Audit entries form an immutable trail of every decision
//! - Sales snapshots feed back into whether publishing continues
//!
//! # Modules
//!
//! - `adapters`: External systems (sources, OpenAI, Gumroad) and the call error taxonomy
//! - `core`: Ledger, retry, cost governor, audit, sales feedback, orchestrator
//! - `domain`: Data records (Candidate, StageOutcome, CostEvent, AuditEntry, ...)
//! - `config`: Settings from file and environment
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Execute one run
//! autopilot run
//!
//! # Inspect a candidate
//! autopilot timeline hn_38112233
//!
//! # Check sales-driven suppression
//! autopilot sales check
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::Settings;
pub use core::{Ledger, Orchestrator, PipelineOptions, Services};
pub use domain::{Candidate, CandidateState, RunId, RunReport, Stage, StageOutcome};
