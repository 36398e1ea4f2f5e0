//! Sales snapshots, published products, and feedback summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fetch of storefront sales data for one product (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesSnapshot {
    pub product_id: String,
    pub product_name: String,
    pub sales_count: u64,

    /// Revenue in minor currency units (cents)
    pub revenue_cents: u64,

    pub views: u64,
    pub refunds: u64,
    pub fetched_at: DateTime<Utc>,
}

/// A candidate that reached the storefront, and the product it became.
///
/// This is the durable link between a candidate and its storefront product,
/// so sales can be attributed without relying on display names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedProduct {
    pub candidate_id: String,
    pub product_id: String,
    pub product_name: String,
    pub product_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// Performance summary over a lookback window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub lookback_days: u32,

    /// Products published within the window
    pub products_published: u64,

    /// Tracked products with at least one sale
    pub products_sold: u64,

    /// Tracked products with a snapshot showing zero sales
    pub zero_sale_products: u64,

    /// Published products with no snapshot yet (not the same as zero sales)
    pub products_without_data: u64,

    pub total_revenue_cents: u64,
    pub total_sales: u64,
    pub total_refunds: u64,

    /// Revenue divided by sales
    pub avg_price_cents: u64,

    /// Revenue divided by tracked products
    pub revenue_per_product_cents: u64,

    /// Refunds divided by sales, 0 when there are no sales
    pub refund_rate: f64,
}

/// Verdict of the sales feedback engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionDecision {
    pub suppress: bool,
    pub reason: String,
}

impl SuppressionDecision {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn suppress(reason: impl Into<String>) -> Self {
        Self {
            suppress: true,
            reason: reason.into(),
        }
    }
}

/// Normalize a product or candidate title for name matching.
///
/// Lowercases, keeps alphanumerics, and collapses everything else into single
/// spaces.
pub fn normalize_product_name(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_product_name() {
        assert_eq!(
            normalize_product_name("  The Landlord's  Toolkit!! "),
            "the landlord s toolkit"
        );
        assert_eq!(
            normalize_product_name("Cold-Email Templates (v2)"),
            normalize_product_name("cold email templates v2")
        );
        assert_eq!(normalize_product_name("***"), "");
    }

    #[test]
    fn test_suppression_constructors() {
        assert!(!SuppressionDecision::allow().suppress);
        let decision = SuppressionDecision::suppress("refunds");
        assert!(decision.suppress);
        assert_eq!(decision.reason, "refunds");
    }
}
