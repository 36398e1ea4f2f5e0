//! Command-line interface for autopilot.
//!
//! Provides commands for executing runs, ingesting candidates, inspecting
//! costs and the audit trail, and driving the sales feedback loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::adapters::{build_sources, Generator, GumroadClient, OpenAiClient, Storefront};
use crate::config::Settings;
use crate::core::{Ledger, Orchestrator, PipelineOptions, Services};
use crate::domain::{AuditEntry, RunId};

pub mod sales;

/// autopilot - Governed content-to-product pipeline
#[derive(Parser, Debug)]
#[command(name = "autopilot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one pipeline run
    Run,

    /// Fetch new candidates from every enabled source without processing
    Ingest,

    /// List recent runs with their costs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the audit timeline of a candidate
    Timeline {
        /// Candidate ID (e.g. hn_123)
        candidate_id: String,
    },

    /// Show every audit entry of a run
    History {
        /// Run ID
        run_id: String,
    },

    /// Show recent errors and budget violations
    Errors {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Sales feedback loop
    Sales {
        #[command(subcommand)]
        command: sales::SalesCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load()?;

        match self.command {
            Commands::Run => run(&settings).await,
            Commands::Ingest => ingest(&settings).await,
            Commands::Runs { limit } => list_runs(&settings, limit),
            Commands::Timeline { candidate_id } => show_timeline(&settings, &candidate_id),
            Commands::History { run_id } => show_history(&settings, &run_id),
            Commands::Errors { limit } => show_errors(&settings, limit),
            Commands::Sales { command } => sales::execute(&settings, command).await,
            Commands::Config => show_config(&settings),
        }
    }
}

/// Open the ledger named by the settings
pub(crate) fn open_ledger(settings: &Settings) -> Result<Ledger> {
    let path = settings.database_path();
    Ledger::open(&path).with_context(|| format!("Failed to open ledger: {}", path.display()))
}

/// Build the storefront client, simulated in dry-run mode
pub(crate) fn build_storefront(settings: &Settings) -> Result<Arc<dyn Storefront>> {
    if settings.pipeline.dry_run {
        return Ok(Arc::new(GumroadClient::dry_run(&settings.storefront)));
    }
    let token = settings
        .gumroad_access_token
        .as_deref()
        .context("GUMROAD_ACCESS_TOKEN is required when dry_run is disabled")?;
    Ok(Arc::new(
        GumroadClient::new(token, &settings.storefront).context("Failed to build storefront client")?,
    ))
}

fn build_generator(settings: &Settings, require_key: bool) -> Result<Arc<dyn Generator>> {
    let api_key = match settings.openai_api_key.clone() {
        Some(key) => key,
        None if require_key => anyhow::bail!("OPENAI_API_KEY is required to run the pipeline"),
        // Never called on this path
        None => String::new(),
    };
    Ok(Arc::new(
        OpenAiClient::new(api_key, settings.pricing.model.clone(), &settings.llm)
            .context("Failed to build generative client")?,
    ))
}

fn build_orchestrator(settings: &Settings, require_generator: bool) -> Result<Orchestrator> {
    settings.validate()?;

    let ledger = open_ledger(settings)?;
    let services = Services {
        sources: build_sources(settings)?,
        generator: build_generator(settings, require_generator)?,
        storefront: build_storefront(settings)?,
    };
    Ok(Orchestrator::new(ledger, services, PipelineOptions::from_settings(settings)))
}

/// Execute one run, stopping between candidates on Ctrl-C
async fn run(settings: &Settings) -> Result<()> {
    let orchestrator = build_orchestrator(settings, !settings.pipeline.kill_switch)?;

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
            std::process::exit(130);
        }
    });

    let report = orchestrator.run().await;
    print!("{}", report);

    if report.stats.aborted {
        std::process::exit(2);
    }
    Ok(())
}

/// Set `cancel` on the first interrupt. Returns true on the second, false
/// once signals can no longer be received.
async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: Arc<AtomicBool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    while next_signal().await.is_ok() {
        if cancel.swap(true, Ordering::SeqCst) {
            warn!("Second interrupt received, exiting");
            return true;
        }
        warn!("Interrupt received, finishing current candidate (interrupt again to exit)");
    }
    false
}

/// Ingest without processing
async fn ingest(settings: &Settings) -> Result<()> {
    let orchestrator = build_orchestrator(settings, false)?;
    let count = orchestrator.ingest(None).await;
    println!("Ingested {} new candidates", count);
    Ok(())
}

/// List recent runs
fn list_runs(settings: &Settings, limit: usize) -> Result<()> {
    let ledger = open_ledger(settings)?;
    let runs = ledger.run_cost_summaries(limit)?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!(
        "{:<15} {:<22} {:>6} {:>10} {:>10} {:>10}  {}",
        "RUN ID", "STARTED", "CALLS", "SENT", "RECEIVED", "COST", "ABORT"
    );
    println!("{}", "-".repeat(100));

    for run in runs {
        println!(
            "{:<15} {:<22} {:>6} {:>10} {:>10} {:>10}  {}",
            run.run_id.to_string(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.calls,
            run.tokens_sent,
            run.tokens_received,
            format!("${:.4}", run.usd_cost),
            run.abort_reason.as_deref().unwrap_or("-")
        );
    }

    println!("\nLifetime cost: ${:.4}", ledger.lifetime_cost()?);
    Ok(())
}

fn show_timeline(settings: &Settings, candidate_id: &str) -> Result<()> {
    let ledger = open_ledger(settings)?;
    let audit = crate::core::AuditLogger::new(ledger.clone());
    println!("{}", audit.get_timeline(candidate_id)?);

    let outcomes = ledger.stage_outcomes_for(candidate_id)?;
    if !outcomes.is_empty() {
        println!("\nStage outcomes:");
        for outcome in outcomes {
            println!(
                "  {:<14} {:<20} {}",
                outcome.stage.as_str(),
                outcome.status.as_str(),
                outcome.error_message.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn show_history(settings: &Settings, run_id: &str) -> Result<()> {
    let run_id: RunId = run_id
        .parse()
        .with_context(|| format!("Invalid run ID: {}", run_id))?;

    let audit = crate::core::AuditLogger::new(open_ledger(settings)?);
    let history = audit.get_run_history(run_id)?;
    if history.is_empty() {
        println!("No audit history found.");
        return Ok(());
    }

    for entry in &history {
        print_entry(entry);
    }
    Ok(())
}

fn show_errors(settings: &Settings, limit: usize) -> Result<()> {
    let audit = crate::core::AuditLogger::new(open_ledger(settings)?);
    let errors = audit.get_recent_errors(limit)?;
    if errors.is_empty() {
        println!("No errors recorded");
        return Ok(());
    }

    for entry in &errors {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &AuditEntry) {
    let mut line = format!(
        "{}  {:<22} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.action.as_str(),
        entry.candidate_id.as_deref().unwrap_or("-")
    );
    if let Some(details) = &entry.details {
        line.push_str(&format!("  {}", details));
    }
    println!("{}", line);
}

/// Show resolved configuration
fn show_config(settings: &Settings) -> Result<()> {
    println!("autopilot configuration");
    println!();
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", settings.home.display());
    println!("  Database:  {}", settings.database_path().display());
    println!("  Artifacts: {}", settings.artifacts_dir().display());
    println!();
    println!("Budget:");
    println!("  Max tokens per run: {}", settings.budget.max_tokens_per_run);
    println!("  Max USD per run:    ${:.2}", settings.budget.max_usd_per_run);
    println!("  Max USD lifetime:   ${:.2}", settings.budget.max_usd_lifetime);
    println!(
        "  Pricing:            {} (${}/1K in, ${}/1K out)",
        settings.pricing.model, settings.pricing.input_per_1k, settings.pricing.output_per_1k
    );
    println!();
    println!("Pipeline:");
    println!("  Regeneration attempts: {}", settings.pipeline.max_regeneration_attempts);
    println!("  Kill switch:           {}", settings.pipeline.kill_switch);
    println!("  Dry run:               {}", settings.pipeline.dry_run);
    println!("  Sources:               {}", settings.sources.enabled.join(", "));
    println!();
    println!("Secrets:");
    println!("  OPENAI_API_KEY:       {}", presence(&settings.openai_api_key));
    println!("  GUMROAD_ACCESS_TOKEN: {}", presence(&settings.gumroad_access_token));
    println!();

    match settings.validate() {
        Ok(()) => println!("Configuration is valid"),
        Err(e) => {
            println!("Configuration problems:");
            for problem in &e.0 {
                println!("  - {}", problem);
            }
        }
    }
    Ok(())
}

fn presence(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "set"
    } else {
        "not set"
    }
}
