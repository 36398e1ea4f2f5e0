//! Sales CLI subcommands.
//!
//! - `ingest`: Fetch storefront sales into the ledger
//! - `summary`: Performance over a lookback window
//! - `check`: Whether publishing would be suppressed

use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use serde_json::json;

use super::{build_storefront, open_ledger};
use crate::config::Settings;
use crate::core::{AuditLogger, RetryHandler, SalesFeedback};
use crate::domain::{AuditAction, AuditEntry};

/// Sales-related subcommands
#[derive(Subcommand, Debug)]
pub enum SalesCommands {
    /// Fetch current sales data from the storefront
    Ingest,

    /// Summarize recent sales performance
    Summary {
        /// Lookback window in days (defaults to the configured window)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Check whether publishing would be suppressed
    Check,
}

pub async fn execute(settings: &Settings, command: SalesCommands) -> Result<()> {
    let ledger = open_ledger(settings)?;
    let feedback = SalesFeedback::new(
        ledger.clone(),
        build_storefront(settings)?,
        Arc::new(RetryHandler::new(settings.retry.clone())),
        settings.sales.clone(),
    );

    match command {
        SalesCommands::Ingest => {
            let result = feedback.ingest_sales_data().await;

            let mut entry = AuditEntry::new(AuditAction::SalesDataIngested).with_details(json!({
                "success": result.success,
                "products_ingested": result.products_ingested,
                "error": result.error,
            }));
            if !result.success {
                entry = entry.flagged_error();
            }
            AuditLogger::new(ledger).record(entry);

            if result.success {
                println!("Ingested sales for {} products", result.products_ingested);
            } else {
                println!(
                    "Sales ingestion failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        SalesCommands::Summary { days } => {
            let days = days.unwrap_or(settings.sales.lookback_days);
            let summary = feedback.generate_feedback_summary(days)?;

            println!("Sales over the last {} days", days);
            println!("  Products published:   {}", summary.products_published);
            println!("  Products sold:        {}", summary.products_sold);
            println!("  Zero-sale products:   {}", summary.zero_sale_products);
            println!("  Without sales data:   {}", summary.products_without_data);
            println!("  Total sales:          {}", summary.total_sales);
            println!("  Total revenue:        ${:.2}", summary.total_revenue_cents as f64 / 100.0);
            println!("  Avg price:            ${:.2}", summary.avg_price_cents as f64 / 100.0);
            println!(
                "  Revenue per product:  ${:.2}",
                summary.revenue_per_product_cents as f64 / 100.0
            );
            println!("  Refund rate:          {:.2}%", summary.refund_rate * 100.0);

            let top = feedback.top_performing(days, 5)?;
            if !top.is_empty() {
                println!("\nTop performing:");
                for name in top {
                    println!("  {}", name);
                }
            }
            let zero = feedback.zero_sale_names(days, 5)?;
            if !zero.is_empty() {
                println!("\nNo sales yet:");
                for name in zero {
                    println!("  {}", name);
                }
            }
        }
        SalesCommands::Check => {
            let decision = feedback.should_suppress_publishing()?;
            if decision.suppress {
                println!("Publishing suppressed: {}", decision.reason);
            } else {
                println!("Publishing allowed");
            }
        }
    }

    Ok(())
}
