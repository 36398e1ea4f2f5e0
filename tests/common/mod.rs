//! Shared fixtures: in-process sources, a scripted generator and a
//! recording storefront.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use autopilot::adapters::{
    CallError, Generation, Generator, ListingReceipt, SalesRecord, Source, Storefront, Usage,
};
use autopilot::core::{BudgetLimits, FeedbackSettings, PipelineOptions, Pricing, RetrySettings};
use autopilot::domain::{Candidate, Listing};

/// Candidate created `age_minutes` ago; newer candidates are processed first
pub fn candidate(id: &str, age_minutes: i64) -> Candidate {
    Candidate {
        id: id.to_string(),
        title: format!("Post {}", id),
        body: "I rebuild the same rent spreadsheet every month".to_string(),
        score: 42,
        url: format!("https://example.com/{}", id),
        source: "mock".to_string(),
        author: "tester".to_string(),
        created_at: Utc::now() - Duration::minutes(age_minutes),
        num_comments: 3,
    }
}

pub fn options(artifacts_dir: impl Into<std::path::PathBuf>) -> PipelineOptions {
    PipelineOptions {
        budget: BudgetLimits::default(),
        pricing: Pricing::default(),
        retry: RetrySettings::immediate(1),
        feedback: FeedbackSettings::default(),
        max_regeneration_attempts: 1,
        kill_switch: false,
        artifacts_dir: artifacts_dir.into(),
    }
}

// ============================================================================
// Sources
// ============================================================================

pub struct MockSource {
    name: String,
    candidates: Vec<Candidate>,
    fail: bool,
    pub calls: Arc<AtomicU32>,
}

impl MockSource {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            name: "mock".to_string(),
            candidates,
            fail: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            candidates: Vec::new(),
            fail: true,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CallError::from_status(503, "source down"));
        }
        Ok(self.candidates.clone())
    }
}

// ============================================================================
// Generator
// ============================================================================

/// One scripted generative reply, consumed in call order
pub enum Reply {
    Json(Value, Usage),
    Text(String, Usage),
    Error(CallError),
}

pub fn usage(input_tokens: u64, output_tokens: u64) -> Usage {
    Usage {
        input_tokens,
        output_tokens,
    }
}

pub fn evaluation(discard: bool) -> Value {
    json!({
        "discard": discard,
        "problem_summary": "Landlords track expenses by hand",
        "who_has_it": "small landlords",
        "why_it_matters": "tax season",
        "current_bad_solutions": ["generic spreadsheets"],
        "urgency_score": 80,
        "evidence_quotes": ["every month I rebuild it"]
    })
}

pub fn spec(confidence: u32) -> Value {
    json!({
        "build": true,
        "product_type": "template pack",
        "working_title": "Landlord Expense Toolkit",
        "target_buyer": "small landlords",
        "job_to_be_done": "track rental expenses",
        "why_existing_products_fail": "too generic",
        "deliverables": ["expense sheet", "tax checklist"],
        "price_recommendation": 19,
        "confidence": confidence
    })
}

pub fn verdict(pass: bool) -> Value {
    if pass {
        json!({
            "pass": true,
            "reasons": [],
            "missing_elements": [],
            "generic_language_detected": false,
            "example_quality_score": 9
        })
    } else {
        json!({
            "pass": false,
            "reasons": ["examples are too generic"],
            "missing_elements": [],
            "generic_language_detected": true,
            "example_quality_score": 5
        })
    }
}

pub const LISTING_TEXT: &str = "Title: Landlord Expense Toolkit\n\
Description: Track every rental expense in one place, ready for tax season.\n\
What You Get: Two sheets and a checklist.\n";

pub fn draft_text() -> String {
    "# Landlord Expense Toolkit\n\nWorked example: unit 2B, March repairs.".to_string()
}

pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    pub calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    fn next(&self) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("generator called more times than scripted")
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate_structured(
        &self,
        _system_prompt: &str,
        _user_input: &str,
        _max_tokens: u32,
    ) -> Result<Generation<String>, CallError> {
        match self.next() {
            Reply::Json(output, usage) => Ok(Generation {
                output: output.to_string(),
                usage,
            }),
            // Raw text lets a structured call receive a reply that is not JSON
            Reply::Text(output, usage) => Ok(Generation { output, usage }),
            Reply::Error(e) => Err(e),
        }
    }

    async fn generate_text(
        &self,
        _system_prompt: &str,
        _user_input: &str,
        _max_tokens: u32,
    ) -> Result<Generation<String>, CallError> {
        match self.next() {
            Reply::Text(output, usage) => Ok(Generation { output, usage }),
            Reply::Error(e) => Err(e),
            Reply::Json(..) => panic!("scripted structured reply for a text call"),
        }
    }
}

// ============================================================================
// Storefront
// ============================================================================

#[derive(Default)]
pub struct MockStorefront {
    pub listings: Mutex<Vec<Listing>>,
    pub sales: Mutex<Vec<SalesRecord>>,
    pub fail_sales: bool,
}

impl MockStorefront {
    pub fn with_sales(sales: Vec<SalesRecord>) -> Self {
        Self {
            sales: Mutex::new(sales),
            ..Default::default()
        }
    }

    pub fn listing_count(&self) -> usize {
        self.listings.lock().unwrap().len()
    }
}

pub fn sales_record(id: &str, name: &str, sales: u64, refunds: u64) -> SalesRecord {
    SalesRecord {
        product_id: id.to_string(),
        product_name: name.to_string(),
        sales_count: sales,
        revenue_cents: sales * 1_900,
        views: 100,
        refunds,
    }
}

#[async_trait]
impl Storefront for MockStorefront {
    fn name(&self) -> &str {
        "mock-store"
    }

    async fn create_listing(&self, listing: &Listing) -> Result<ListingReceipt, CallError> {
        let mut listings = self.listings.lock().unwrap();
        listings.push(listing.clone());
        let id = format!("prod_{}", listings.len());
        Ok(ListingReceipt {
            url: Some(format!("https://store.example/{}", id)),
            id,
        })
    }

    async fn fetch_sales_data(&self) -> Result<Vec<SalesRecord>, CallError> {
        if self.fail_sales {
            return Err(CallError::Timeout("sales api".to_string()));
        }
        Ok(self.sales.lock().unwrap().clone())
    }
}
