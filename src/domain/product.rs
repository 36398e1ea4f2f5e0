//! Typed records for generative-service outputs.
//!
//! The generative service returns loosely-shaped JSON. These types are the
//! boundary: defaults and validation live here, so business logic only ever
//! sees well-formed values.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Minimum example-quality score for a draft to pass verification
pub const MIN_EXAMPLE_QUALITY: u32 = 7;

/// Problem/opportunity evaluation of a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// True when the candidate is not monetizable
    #[serde(default = "default_true")]
    pub discard: bool,

    #[serde(default)]
    pub problem_summary: String,

    #[serde(default)]
    pub who_has_it: String,

    #[serde(default)]
    pub why_it_matters: String,

    #[serde(default)]
    pub current_bad_solutions: Vec<String>,

    #[serde(default, deserialize_with = "lenient_u32")]
    pub urgency_score: u32,

    #[serde(default)]
    pub evidence_quotes: Vec<String>,
}

impl Evaluation {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Specification of the product to build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// False when the specification step declines to build
    #[serde(default)]
    pub build: bool,

    #[serde(default)]
    pub product_type: String,

    #[serde(default)]
    pub working_title: String,

    #[serde(default)]
    pub target_buyer: String,

    #[serde(default)]
    pub job_to_be_done: String,

    #[serde(default)]
    pub why_existing_products_fail: String,

    #[serde(default)]
    pub deliverables: Vec<String>,

    /// Recommended price in major currency units
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price_recommendation: f64,

    /// 0-100
    #[serde(default, deserialize_with = "lenient_u32")]
    pub confidence: u32,
}

impl ProductSpec {
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Price in cents, never negative
    pub fn price_cents(&self) -> u64 {
        (self.price_recommendation.max(0.0) * 100.0).round() as u64
    }
}

/// Verification verdict for drafted content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "pass", default)]
    pub passed: bool,

    #[serde(default)]
    pub reasons: Vec<String>,

    #[serde(default)]
    pub missing_elements: Vec<String>,

    #[serde(default)]
    pub generic_language_detected: bool,

    #[serde(default, deserialize_with = "lenient_u32")]
    pub example_quality_score: u32,
}

impl Verdict {
    /// Parse a verdict and apply the hard quality gates.
    ///
    /// A verdict never passes with low example quality, generic language, or
    /// missing elements, whatever the service claimed.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut verdict: Verdict = serde_json::from_value(value)?;
        if verdict.example_quality_score < MIN_EXAMPLE_QUALITY
            || verdict.generic_language_detected
            || !verdict.missing_elements.is_empty()
        {
            verdict.passed = false;
        }
        Ok(verdict)
    }
}

/// Storefront listing parsed from generated listing text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub description: String,
    pub price_cents: u64,
}

/// Listing text that cannot be submitted
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ListingError {
    #[error("Invalid title extracted from listing: '{0}'")]
    InvalidTitle(String),

    #[error("Invalid description extracted from listing (length: {0})")]
    InvalidDescription(usize),
}

const TITLE_MARKER: &str = "Title:";
const DESCRIPTION_MARKER: &str = "Description:";
const SECTION_MARKERS: [&str; 3] = ["What You Get:", "Who This Is NOT For:", "FAQ"];
const MAX_TITLE_CHARS: usize = 100;

impl Listing {
    /// Parse listing text into submit-ready fields
    pub fn parse(text: &str, fallback_title: &str, price_cents: u64) -> Result<Self, ListingError> {
        let title = text
            .lines()
            .find_map(|line| line.strip_prefix(TITLE_MARKER))
            .map(str::trim)
            .unwrap_or(fallback_title)
            .to_string();

        if title.trim().chars().count() < 3 {
            return Err(ListingError::InvalidTitle(title));
        }

        let description = extract_description(text);
        if description.chars().count() < 10 {
            return Err(ListingError::InvalidDescription(description.chars().count()));
        }

        Ok(Self {
            title: title.chars().take(MAX_TITLE_CHARS).collect(),
            description,
            price_cents,
        })
    }
}

fn extract_description(text: &str) -> String {
    let Some(start) = text.find(DESCRIPTION_MARKER) else {
        return text.trim().to_string();
    };
    let body_start = start + DESCRIPTION_MARKER.len();

    let end = SECTION_MARKERS
        .iter()
        .filter_map(|marker| text[body_start..].find(marker).map(|pos| body_start + pos))
        .min()
        .unwrap_or(text.len());

    let description = text[body_start..end].trim();
    if description.is_empty() {
        text.trim().to_string()
    } else {
        description.to_string()
    }
}

fn default_true() -> bool {
    true
}

/// Accepts numbers, floats and numeric strings; anything else is 0
fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).map(|n| n.clamp(0.0, u32::MAX as f64) as u32).unwrap_or(0))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(number_from_value(&value).unwrap_or(0.0))
}

fn number_from_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluation_defaults_to_discard() {
        let evaluation = Evaluation::from_value(json!({})).unwrap();
        assert!(evaluation.discard);
        assert_eq!(evaluation.urgency_score, 0);
    }

    #[test]
    fn test_spec_defaults_to_no_build() {
        let spec = ProductSpec::from_value(json!({"working_title": "X"})).unwrap();
        assert!(!spec.build);
        assert_eq!(spec.confidence, 0);
    }

    #[test]
    fn test_spec_lenient_numbers() {
        let spec = ProductSpec::from_value(json!({
            "build": true,
            "confidence": "85",
            "price_recommendation": "$19.99"
        }))
        .unwrap();
        assert_eq!(spec.confidence, 85);
        assert_eq!(spec.price_cents(), 1999);

        let spec = ProductSpec::from_value(json!({"confidence": 72.6})).unwrap();
        assert_eq!(spec.confidence, 72);
    }

    #[test]
    fn test_verdict_quality_gates() {
        let low_quality = Verdict::from_value(json!({"pass": true, "example_quality_score": 6})).unwrap();
        assert!(!low_quality.passed);

        let generic = Verdict::from_value(json!({
            "pass": true,
            "example_quality_score": 9,
            "generic_language_detected": true
        }))
        .unwrap();
        assert!(!generic.passed);

        let missing = Verdict::from_value(json!({
            "pass": true,
            "example_quality_score": 9,
            "missing_elements": ["pricing table"]
        }))
        .unwrap();
        assert!(!missing.passed);

        let good = Verdict::from_value(json!({"pass": true, "example_quality_score": 8})).unwrap();
        assert!(good.passed);
    }

    #[test]
    fn test_listing_parse_sections() {
        let text = "Title: Landlord Toolkit\n\nDescription: Everything a small landlord needs.\n\nWhat You Get:\n- templates";
        let listing = Listing::parse(text, "Fallback", 1500).unwrap();
        assert_eq!(listing.title, "Landlord Toolkit");
        assert_eq!(listing.description, "Everything a small landlord needs.");
        assert_eq!(listing.price_cents, 1500);
    }

    #[test]
    fn test_listing_falls_back_to_whole_text() {
        let text = "A long description without any markers at all.";
        let listing = Listing::parse(text, "Fallback Title", 900).unwrap();
        assert_eq!(listing.title, "Fallback Title");
        assert_eq!(listing.description, text);
    }

    #[test]
    fn test_listing_rejects_short_fields() {
        assert!(matches!(
            Listing::parse("Title: ab\nDescription: long enough text", "x", 0),
            Err(ListingError::InvalidTitle(_))
        ));
        assert!(matches!(
            Listing::parse("Title: Good title\nDescription: short", "x", 0),
            Err(ListingError::InvalidDescription(5))
        ));
    }
}
