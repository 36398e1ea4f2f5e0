//! Sales Feedback Tests
//!
//! Snapshot ingestion, summaries and the suppression decision.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use autopilot::core::{FeedbackSettings, Ledger, RetryHandler, RetrySettings, SalesFeedback};
use autopilot::domain::{PublishedProduct, SalesSnapshot};

use common::{sales_record, MockStorefront};

fn engine(ledger: &Ledger, storefront: MockStorefront, settings: FeedbackSettings) -> SalesFeedback {
    SalesFeedback::new(
        ledger.clone(),
        Arc::new(storefront),
        Arc::new(RetryHandler::new(RetrySettings::immediate(1))),
        settings,
    )
}

fn publish(ledger: &Ledger, id: &str, name: &str, days_ago: i64) {
    ledger
        .record_published_product(&PublishedProduct {
            candidate_id: format!("cand_{}", id),
            product_id: id.to_string(),
            product_name: name.to_string(),
            product_url: None,
            published_at: Utc::now() - Duration::days(days_ago),
        })
        .unwrap();
}

fn snapshot(ledger: &Ledger, id: &str, name: &str, sales: u64, refunds: u64) {
    ledger
        .append_sales_snapshot(&SalesSnapshot {
            product_id: id.to_string(),
            product_name: name.to_string(),
            sales_count: sales,
            revenue_cents: sales * 2_000,
            views: 50,
            refunds,
            fetched_at: Utc::now(),
        })
        .unwrap();
}

fn threshold(count: u32) -> FeedbackSettings {
    FeedbackSettings {
        zero_sales_suppression_count: count,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_ingest_stores_one_snapshot_per_product() {
    let ledger = Ledger::open_in_memory().unwrap();
    let storefront = MockStorefront::with_sales(vec![
        sales_record("p1", "Rent Tracker", 3, 0),
        sales_record("p2", "Tax Checklist", 0, 0),
    ]);
    let feedback = engine(&ledger, storefront, FeedbackSettings::default());

    let result = feedback.ingest_sales_data().await;
    assert!(result.success);
    assert_eq!(result.products_ingested, 2);
    assert!(result.error.is_none());

    let stored = ledger.sales_snapshots_since(Utc::now() - Duration::days(1)).unwrap();
    assert_eq!(stored.len(), 2);
    let fetched_ms = result.fetched_at.timestamp_millis();
    assert!(stored.iter().all(|s| s.fetched_at.timestamp_millis() == fetched_ms));
}

#[tokio::test]
async fn test_empty_or_failing_storefront_is_not_success() {
    let ledger = Ledger::open_in_memory().unwrap();

    let empty = engine(&ledger, MockStorefront::default(), FeedbackSettings::default());
    let result = empty.ingest_sales_data().await;
    assert!(!result.success);
    assert_eq!(result.products_ingested, 0);

    let failing = engine(
        &ledger,
        MockStorefront {
            fail_sales: true,
            ..Default::default()
        },
        FeedbackSettings::default(),
    );
    let result = failing.ingest_sales_data().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));

    assert!(ledger.sales_snapshots_since(Utc::now() - Duration::days(1)).unwrap().is_empty());
}

#[test]
fn test_missing_data_is_not_zero_sales() {
    let ledger = Ledger::open_in_memory().unwrap();
    for i in 0..3 {
        publish(&ledger, &format!("p{}", i), &format!("Product {}", i), 1);
    }
    // Two tracked at zero, one never fetched
    snapshot(&ledger, "p0", "Product 0", 0, 0);
    snapshot(&ledger, "p1", "Product 1", 0, 0);

    let feedback = engine(&ledger, MockStorefront::default(), threshold(3));
    let decision = feedback.should_suppress_publishing().unwrap();
    assert!(!decision.suppress);

    let summary = feedback.generate_feedback_summary(30).unwrap();
    assert_eq!(summary.products_published, 3);
    assert_eq!(summary.zero_sale_products, 2);
    assert_eq!(summary.products_without_data, 1);
}

#[test]
fn test_no_snapshots_means_no_data() {
    let ledger = Ledger::open_in_memory().unwrap();
    for i in 0..4 {
        publish(&ledger, &format!("p{}", i), &format!("Product {}", i), 2);
    }

    let feedback = engine(&ledger, MockStorefront::default(), threshold(2));
    let summary = feedback.generate_feedback_summary(30).unwrap();
    assert_eq!(summary.products_published, 4);
    assert_eq!(summary.products_without_data, 4);
    assert_eq!(summary.zero_sale_products, 0);
    assert_eq!(summary.products_sold, 0);
    assert!(!feedback.should_suppress_publishing().unwrap().suppress);
}

#[test]
fn test_zero_sales_streak_suppresses() {
    let ledger = Ledger::open_in_memory().unwrap();
    publish(&ledger, "old", "Old Winner", 5);
    snapshot(&ledger, "old", "Old Winner", 10, 0);
    for i in 0..3 {
        publish(&ledger, &format!("p{}", i), &format!("Product {}", i), 0);
        snapshot(&ledger, &format!("p{}", i), &format!("Product {}", i), 0, 0);
    }

    let feedback = engine(&ledger, MockStorefront::default(), threshold(3));
    let decision = feedback.should_suppress_publishing().unwrap();
    assert!(decision.suppress);
    assert_eq!(decision.reason, "Last 3 products had zero sales");
}

#[test]
fn test_below_threshold_count_does_not_suppress() {
    let ledger = Ledger::open_in_memory().unwrap();
    for i in 0..2 {
        publish(&ledger, &format!("p{}", i), &format!("Product {}", i), 0);
        snapshot(&ledger, &format!("p{}", i), &format!("Product {}", i), 0, 0);
    }

    let feedback = engine(&ledger, MockStorefront::default(), threshold(5));
    assert!(!feedback.should_suppress_publishing().unwrap().suppress);
}

#[test]
fn test_snapshot_matched_by_normalized_name() {
    let ledger = Ledger::open_in_memory().unwrap();
    publish(&ledger, "local_id", "Rent Tracker!", 0);
    snapshot(&ledger, "store_id", "rent  tracker", 0, 0);

    let feedback = engine(&ledger, MockStorefront::default(), threshold(1));
    assert!(feedback.should_suppress_publishing().unwrap().suppress);
}

#[test]
fn test_refund_rate_suppresses() {
    let ledger = Ledger::open_in_memory().unwrap();
    publish(&ledger, "p1", "Rent Tracker", 2);
    snapshot(&ledger, "p1", "Rent Tracker", 10, 4);

    let feedback = engine(&ledger, MockStorefront::default(), FeedbackSettings::default());
    let decision = feedback.should_suppress_publishing().unwrap();
    assert!(decision.suppress);
    assert_eq!(decision.reason, "Refund rate 40.00% exceeds threshold 30.00%");

    let summary = feedback.generate_feedback_summary(30).unwrap();
    assert_eq!(summary.total_sales, 10);
    assert_eq!(summary.total_refunds, 4);
    assert_eq!(summary.avg_price_cents, 2_000);
    assert!((summary.refund_rate - 0.4).abs() < 1e-9);
}

#[test]
fn test_no_sales_history_allows_publishing() {
    let ledger = Ledger::open_in_memory().unwrap();
    let feedback = engine(&ledger, MockStorefront::default(), FeedbackSettings::default());

    let decision = feedback.should_suppress_publishing().unwrap();
    assert!(!decision.suppress);
    assert!(feedback.top_performing(30, 5).unwrap().is_empty());
}
