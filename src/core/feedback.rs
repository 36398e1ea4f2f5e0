//! Sales feedback engine.
//!
//! Ingests storefront sales snapshots, summarizes recent performance, and
//! decides whether publishing should be suppressed. Callers treat every error
//! from this engine as "do not suppress".

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ledger::{Ledger, LedgerError};
use super::retry::{RetryCategory, RetryHandler};
use crate::adapters::Storefront;
use crate::domain::{normalize_product_name, FeedbackSummary, PublishedProduct, SalesSnapshot, SuppressionDecision};

/// Suppression thresholds and the sales lookback window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSettings {
    /// Suppress when this many most recent products all have tracked zero sales
    #[serde(default = "default_zero_sales_suppression_count")]
    pub zero_sales_suppression_count: u32,

    /// Suppress when refunds / sales exceeds this
    #[serde(default = "default_refund_rate_max")]
    pub refund_rate_max: f64,

    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_zero_sales_suppression_count() -> u32 {
    5
}
fn default_refund_rate_max() -> f64 {
    0.3
}
fn default_lookback_days() -> u32 {
    30
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            zero_sales_suppression_count: default_zero_sales_suppression_count(),
            refund_rate_max: default_refund_rate_max(),
            lookback_days: default_lookback_days(),
        }
    }
}

/// Result of one sales ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub success: bool,
    pub products_ingested: usize,
    pub fetched_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Latest snapshot per storefront product within a window
struct LatestSales {
    by_id: HashMap<String, SalesSnapshot>,
    id_by_name: HashMap<String, String>,
}

impl LatestSales {
    fn from_snapshots(snapshots: Vec<SalesSnapshot>) -> Self {
        let mut by_id = HashMap::new();
        let mut id_by_name = HashMap::new();
        // Oldest first, so later snapshots overwrite earlier ones
        for snapshot in snapshots {
            id_by_name.insert(normalize_product_name(&snapshot.product_name), snapshot.product_id.clone());
            by_id.insert(snapshot.product_id.clone(), snapshot);
        }
        Self { by_id, id_by_name }
    }

    /// Snapshot for a published product: by product id, then by name
    fn lookup(&self, product: &PublishedProduct) -> Option<&SalesSnapshot> {
        self.by_id.get(&product.product_id).or_else(|| {
            self.id_by_name
                .get(&normalize_product_name(&product.product_name))
                .and_then(|id| self.by_id.get(id))
        })
    }

    fn snapshots(&self) -> impl Iterator<Item = &SalesSnapshot> {
        self.by_id.values()
    }
}

/// Sales-driven governance over the ledger and the storefront
pub struct SalesFeedback {
    ledger: Ledger,
    storefront: Arc<dyn Storefront>,
    retry: Arc<RetryHandler>,
    settings: FeedbackSettings,
}

impl SalesFeedback {
    pub fn new(
        ledger: Ledger,
        storefront: Arc<dyn Storefront>,
        retry: Arc<RetryHandler>,
        settings: FeedbackSettings,
    ) -> Self {
        Self {
            ledger,
            storefront,
            retry,
            settings,
        }
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    /// Fetch sales for every storefront product and append one snapshot each.
    ///
    /// Never fails: fetch and write problems are reported through
    /// `success = false`.
    pub async fn ingest_sales_data(&self) -> IngestResult {
        let fetched_at = Utc::now();
        let storefront = self.storefront.clone();

        let records = match self
            .retry
            .with_retry(RetryCategory::Storefront, || storefront.fetch_sales_data())
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Sales data fetch failed");
                return IngestResult {
                    success: false,
                    products_ingested: 0,
                    fetched_at,
                    error: Some(e.to_string()),
                };
            }
        };

        if records.is_empty() {
            return IngestResult {
                success: false,
                products_ingested: 0,
                fetched_at,
                error: Some("storefront returned no products".to_string()),
            };
        }

        let mut ingested = 0;
        for record in records {
            let snapshot = SalesSnapshot {
                product_id: record.product_id,
                product_name: record.product_name,
                sales_count: record.sales_count,
                revenue_cents: record.revenue_cents,
                views: record.views,
                refunds: record.refunds,
                fetched_at,
            };
            if let Err(e) = self.ledger.append_sales_snapshot(&snapshot) {
                warn!(error = %e, product_id = %snapshot.product_id, "Failed to store sales snapshot");
                return IngestResult {
                    success: false,
                    products_ingested: ingested,
                    fetched_at,
                    error: Some(e.to_string()),
                };
            }
            ingested += 1;
        }

        info!(products = ingested, "Ingested sales data");
        IngestResult {
            success: true,
            products_ingested: ingested,
            fetched_at,
            error: None,
        }
    }

    /// Summarize performance over the last `lookback_days`
    pub fn generate_feedback_summary(&self, lookback_days: u32) -> Result<FeedbackSummary, LedgerError> {
        let since = window_start(lookback_days);
        let latest = self.latest_sales(since)?;
        let published = self.ledger.published_products_since(since)?;

        let mut summary = FeedbackSummary {
            lookback_days,
            products_published: published.len() as u64,
            ..Default::default()
        };

        summary.products_without_data = published
            .iter()
            .filter(|product| latest.lookup(product).is_none())
            .count() as u64;

        let mut tracked = 0u64;
        for snapshot in latest.snapshots() {
            tracked += 1;
            if snapshot.sales_count > 0 {
                summary.products_sold += 1;
            } else {
                summary.zero_sale_products += 1;
            }
            summary.total_sales += snapshot.sales_count;
            summary.total_refunds += snapshot.refunds;
            summary.total_revenue_cents += snapshot.revenue_cents;
        }

        if summary.total_sales > 0 {
            summary.avg_price_cents = summary.total_revenue_cents / summary.total_sales;
            summary.refund_rate = summary.total_refunds as f64 / summary.total_sales as f64;
        }
        if tracked > 0 {
            summary.revenue_per_product_cents = summary.total_revenue_cents / tracked;
        }

        Ok(summary)
    }

    /// Decide whether publishing should be suppressed.
    ///
    /// Missing sales data never counts as zero sales.
    pub fn should_suppress_publishing(&self) -> Result<SuppressionDecision, LedgerError> {
        let threshold = self.settings.zero_sales_suppression_count as usize;
        let since = window_start(self.settings.lookback_days);
        let latest = self.latest_sales(since)?;

        let recent = self.ledger.recent_published_products(threshold)?;
        if threshold > 0 && recent.len() >= threshold {
            let all_tracked_zero = recent
                .iter()
                .all(|product| matches!(latest.lookup(product), Some(s) if s.sales_count == 0));
            if all_tracked_zero {
                return Ok(SuppressionDecision::suppress(format!(
                    "Last {} products had zero sales",
                    threshold
                )));
            }
        }

        let (sales, refunds) = latest
            .snapshots()
            .fold((0u64, 0u64), |(s, r), snap| (s + snap.sales_count, r + snap.refunds));
        if sales > 0 {
            let refund_rate = refunds as f64 / sales as f64;
            if refund_rate > self.settings.refund_rate_max {
                return Ok(SuppressionDecision::suppress(format!(
                    "Refund rate {:.2}% exceeds threshold {:.2}%",
                    refund_rate * 100.0,
                    self.settings.refund_rate_max * 100.0
                )));
            }
        }

        Ok(SuppressionDecision::allow())
    }

    /// Best-selling product names in the window, best first
    pub fn top_performing(&self, lookback_days: u32, limit: usize) -> Result<Vec<String>, LedgerError> {
        let latest = self.latest_sales(window_start(lookback_days))?;
        let mut sold: Vec<&SalesSnapshot> = latest.snapshots().filter(|s| s.sales_count > 0).collect();
        sold.sort_by(|a, b| {
            b.sales_count
                .cmp(&a.sales_count)
                .then_with(|| a.product_name.cmp(&b.product_name))
        });
        Ok(sold.into_iter().take(limit).map(|s| s.product_name.clone()).collect())
    }

    /// Names of tracked products with no sales in the window
    pub fn zero_sale_names(&self, lookback_days: u32, limit: usize) -> Result<Vec<String>, LedgerError> {
        let latest = self.latest_sales(window_start(lookback_days))?;
        let mut names: Vec<String> = latest
            .snapshots()
            .filter(|s| s.sales_count == 0)
            .map(|s| s.product_name.clone())
            .collect();
        names.sort();
        names.truncate(limit);
        Ok(names)
    }

    fn latest_sales(&self, since: DateTime<Utc>) -> Result<LatestSales, LedgerError> {
        Ok(LatestSales::from_snapshots(self.ledger.sales_snapshots_since(since)?))
    }
}

fn window_start(lookback_days: u32) -> DateTime<Utc> {
    Utc::now() - Duration::days(i64::from(lookback_days))
}
