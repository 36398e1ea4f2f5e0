//! Generative pipeline stages.
//!
//! Every call made here is governed: token estimate, budget check, the call
//! itself under the generative retry policy, then recording of actual usage.

use tracing::debug;

use super::governor::{estimate_tokens, CostGovernor};
use super::retry::{RetryCategory, RetryHandler};
use crate::adapters::{CallError, Generator};
use crate::domain::{Candidate, Evaluation, Listing, ProductSpec, Verdict};

pub const EVALUATION_PROMPT: &str = "You evaluate discussion posts for a monetizable problem. \
Reply with a JSON object: discard (bool), problem_summary, who_has_it, why_it_matters, \
current_bad_solutions (list), urgency_score (0-100), evidence_quotes (list).";

pub const SPECIFICATION_PROMPT: &str = "You turn a validated problem into a digital product spec. \
Reply with a JSON object: build (bool), product_type, working_title, target_buyer, \
job_to_be_done, why_existing_products_fail, deliverables (list), \
price_recommendation (USD number), confidence (0-100).";

pub const DRAFTING_PROMPT: &str = "You write the complete content of a digital product from its spec. \
Be concrete, use worked examples, avoid generic filler.";

pub const VERIFICATION_PROMPT: &str = "You are a strict reviewer of digital product content. \
Reply with a JSON object: pass (bool), reasons (list), missing_elements (list), \
generic_language_detected (bool), example_quality_score (0-10).";

pub const LISTING_PROMPT: &str = "You write storefront listings. Reply in plain text with a \
'Title:' line, a 'Description:' section, then 'What You Get:', 'Who This Is NOT For:' and 'FAQ' sections.";

pub const EVALUATION_MAX_TOKENS: u32 = 1500;
pub const SPECIFICATION_MAX_TOKENS: u32 = 1500;
pub const DRAFTING_MAX_TOKENS: u32 = 3000;
pub const VERIFICATION_MAX_TOKENS: u32 = 1000;
pub const LISTING_MAX_TOKENS: u32 = 1500;

/// Minimum spec confidence (0-100) to proceed
pub const MIN_CONFIDENCE: u32 = 70;

/// Minimum number of deliverables a spec must name
pub const MIN_DELIVERABLES: usize = 1;

const MAX_CANDIDATE_BODY_CHARS: usize = 4000;
const MAX_LISTING_CONTENT_CHARS: usize = 2000;

/// Pull the JSON object out of model output that may be fenced or wrapped
fn extract_json(content: &str) -> &str {
    if let Some(start) = content.find("```json") {
        let json_start = start + 7;
        if let Some(end) = content[json_start..].find("```") {
            return content[json_start..json_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (content.find('{'), content.rfind('}')) {
        if start < end {
            return &content[start..=end];
        }
    }

    content
}

/// Parse a structured reply into a JSON object
pub fn parse_json_object(content: &str) -> Result<serde_json::Value, CallError> {
    let value: serde_json::Value = serde_json::from_str(extract_json(content))?;
    if !value.is_object() {
        return Err(CallError::InvalidResponse("expected a JSON object".to_string()));
    }
    Ok(value)
}

/// Reason a spec is rejected, or `None` if it may proceed
pub fn spec_rejection(spec: &ProductSpec) -> Option<String> {
    if !spec.build {
        return Some("spec declined to build".to_string());
    }
    if spec.confidence < MIN_CONFIDENCE {
        return Some(format!(
            "confidence {} below threshold {}",
            spec.confidence, MIN_CONFIDENCE
        ));
    }
    if spec.deliverables.len() < MIN_DELIVERABLES {
        return Some(format!(
            "{} deliverables, minimum is {}",
            spec.deliverables.len(),
            MIN_DELIVERABLES
        ));
    }
    None
}

/// Runs generative stages for one run, under its governor
pub struct StageRunner<'a> {
    generator: &'a dyn Generator,
    retry: &'a RetryHandler,
    governor: &'a mut CostGovernor,
}

impl<'a> StageRunner<'a> {
    pub fn new(generator: &'a dyn Generator, retry: &'a RetryHandler, governor: &'a mut CostGovernor) -> Self {
        Self {
            generator,
            retry,
            governor,
        }
    }

    pub fn governor(&self) -> &CostGovernor {
        self.governor
    }

    /// Problem/opportunity evaluation
    pub async fn evaluate(&mut self, candidate: &Candidate) -> Result<Evaluation, CallError> {
        let input = candidate.to_prompt_text(MAX_CANDIDATE_BODY_CHARS);
        let value = self
            .structured(EVALUATION_PROMPT, &input, EVALUATION_MAX_TOKENS)
            .await?;
        Ok(Evaluation::from_value(value)?)
    }

    /// Product specification from an evaluation
    pub async fn specify(&mut self, evaluation: &Evaluation) -> Result<ProductSpec, CallError> {
        let input = serde_json::to_string_pretty(evaluation)?;
        let value = self
            .structured(SPECIFICATION_PROMPT, &input, SPECIFICATION_MAX_TOKENS)
            .await?;
        Ok(ProductSpec::from_value(value)?)
    }

    /// Draft product content, taking the previous verdict into account
    pub async fn draft(&mut self, spec: &ProductSpec, previous: Option<&Verdict>) -> Result<String, CallError> {
        let mut input = serde_json::to_string_pretty(spec)?;
        if let Some(verdict) = previous {
            input.push_str("\n\nThe previous draft was rejected.");
            for reason in &verdict.reasons {
                input.push_str(&format!("\nReason: {}", reason));
            }
            for missing in &verdict.missing_elements {
                input.push_str(&format!("\nMissing: {}", missing));
            }
        }
        let content = self.text(DRAFTING_PROMPT, &input, DRAFTING_MAX_TOKENS).await?;
        if content.trim().is_empty() {
            return Err(CallError::InvalidResponse("empty draft".to_string()));
        }
        Ok(content)
    }

    /// Verify drafted content
    pub async fn verify(&mut self, content: &str) -> Result<Verdict, CallError> {
        let value = self
            .structured(VERIFICATION_PROMPT, content, VERIFICATION_MAX_TOKENS)
            .await?;
        Ok(Verdict::from_value(value)?)
    }

    /// Generate and parse listing text. Returns the listing and the raw text.
    pub async fn write_listing(&mut self, spec: &ProductSpec, content: &str) -> Result<(Listing, String), CallError> {
        let excerpt: String = content.chars().take(MAX_LISTING_CONTENT_CHARS).collect();
        let input = format!(
            "Product: {}\nType: {}\nBuyer: {}\nJob: {}\nDeliverables: {}\n\nContent excerpt:\n{}",
            spec.working_title,
            spec.product_type,
            spec.target_buyer,
            spec.job_to_be_done,
            spec.deliverables.join(", "),
            excerpt
        );
        let text = self.text(LISTING_PROMPT, &input, LISTING_MAX_TOKENS).await?;
        let listing = Listing::parse(&text, &spec.working_title, spec.price_cents())
            .map_err(|e| CallError::InvalidResponse(e.to_string()))?;
        Ok((listing, text))
    }

    async fn structured(
        &mut self,
        system_prompt: &str,
        user_input: &str,
        max_tokens: u32,
    ) -> Result<serde_json::Value, CallError> {
        self.preflight(system_prompt, user_input, max_tokens)?;
        let generator = self.generator;
        let generation = self
            .retry
            .with_retry(RetryCategory::Generative, || {
                generator.generate_structured(system_prompt, user_input, max_tokens)
            })
            .await?;
        // Billed whether or not the reply parses
        self.governor
            .record_usage(generation.usage.input_tokens, generation.usage.output_tokens)?;
        parse_json_object(&generation.output)
    }

    async fn text(&mut self, system_prompt: &str, user_input: &str, max_tokens: u32) -> Result<String, CallError> {
        self.preflight(system_prompt, user_input, max_tokens)?;
        let generator = self.generator;
        let generation = self
            .retry
            .with_retry(RetryCategory::Generative, || {
                generator.generate_text(system_prompt, user_input, max_tokens)
            })
            .await?;
        self.governor
            .record_usage(generation.usage.input_tokens, generation.usage.output_tokens)?;
        Ok(generation.output)
    }

    fn preflight(&mut self, system_prompt: &str, user_input: &str, max_tokens: u32) -> Result<(), CallError> {
        let estimated_input = estimate_tokens(system_prompt) + estimate_tokens(user_input);
        debug!(estimated_input, max_tokens, "Governed call preflight");
        self.governor
            .check_before_call(estimated_input, u64::from(max_tokens))?;
        Ok(())
    }
}
