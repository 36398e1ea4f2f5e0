//! Retry with exponential backoff for external calls.
//!
//! Only transient failures are retried. Each call category carries its own
//! backoff parameters.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::adapters::CallError;
use crate::domain::RetryStats;

/// Kinds of external call, each with its own backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCategory {
    /// Content-source fetches
    Source,

    /// Generative service calls
    Generative,

    /// Storefront API calls
    Storefront,
}

impl RetryCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Generative => "generative",
            Self::Storefront => "storefront",
        }
    }
}

/// Backoff parameters for one category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    pub max_attempts: u32,

    /// Wait before the first retry, in milliseconds
    pub min_wait_ms: u64,

    /// Upper bound on any single wait, in milliseconds
    pub max_wait_ms: u64,

    /// Backoff multiplier (wait *= multiplier after each retry)
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_wait_ms: u64, max_wait_ms: u64, multiplier: f64) -> Self {
        Self {
            max_attempts,
            min_wait_ms,
            max_wait_ms,
            multiplier,
        }
    }

    /// A policy that never sleeps
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0, 1.0)
    }

    /// Calculate the wait after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.min_wait_ms.min(self.max_wait_ms));
        }

        let delay = self.min_wait_ms as f64 * self.multiplier.powi((attempt - 1) as i32);
        let capped = delay.min(self.max_wait_ms as f64).max(0.0) as u64;
        Duration::from_millis(capped)
    }

    /// Check if another attempt is allowed after `attempt` attempts
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Per-category retry configuration.
///
/// A configured policy may name only some fields; the rest come from that
/// category's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "RetrySettingsFile")]
pub struct RetrySettings {
    pub source: RetryPolicy,
    pub generative: RetryPolicy,
    pub storefront: RetryPolicy,
}

/// A policy as written in the config file
#[derive(Debug, Default, Deserialize)]
struct PolicyOverrides {
    max_attempts: Option<u32>,
    min_wait_ms: Option<u64>,
    max_wait_ms: Option<u64>,
    multiplier: Option<f64>,
}

impl PolicyOverrides {
    fn over(self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            min_wait_ms: self.min_wait_ms.unwrap_or(base.min_wait_ms),
            max_wait_ms: self.max_wait_ms.unwrap_or(base.max_wait_ms),
            multiplier: self.multiplier.unwrap_or(base.multiplier),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetrySettingsFile {
    source: PolicyOverrides,
    generative: PolicyOverrides,
    storefront: PolicyOverrides,
}

impl From<RetrySettingsFile> for RetrySettings {
    fn from(file: RetrySettingsFile) -> Self {
        Self {
            source: file.source.over(default_source_policy()),
            generative: file.generative.over(default_generative_policy()),
            storefront: file.storefront.over(default_storefront_policy()),
        }
    }
}

fn default_source_policy() -> RetryPolicy {
    RetryPolicy::new(3, 2_000, 30_000, 2.0)
}
fn default_generative_policy() -> RetryPolicy {
    RetryPolicy::new(4, 1_000, 60_000, 2.0)
}
fn default_storefront_policy() -> RetryPolicy {
    RetryPolicy::new(3, 2_000, 30_000, 2.0)
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            source: default_source_policy(),
            generative: default_generative_policy(),
            storefront: default_storefront_policy(),
        }
    }
}

impl RetrySettings {
    /// Zero-wait policies with the given attempt ceiling for every category
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            source: RetryPolicy::immediate(max_attempts),
            generative: RetryPolicy::immediate(max_attempts),
            storefront: RetryPolicy::immediate(max_attempts),
        }
    }

    pub fn policy(&self, category: RetryCategory) -> &RetryPolicy {
        match category {
            RetryCategory::Source => &self.source,
            RetryCategory::Generative => &self.generative,
            RetryCategory::Storefront => &self.storefront,
        }
    }
}

/// Runs operations under the configured backoff and keeps aggregate counters
#[derive(Debug, Default)]
pub struct RetryHandler {
    settings: RetrySettings,
    total_attempts: AtomicU64,
    successful_retries: AtomicU64,
    failed_operations: AtomicU64,
}

impl RetryHandler {
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Execute `op`, retrying transient failures with exponential backoff.
    ///
    /// Returns the first success, the first fatal error, or the last
    /// transient error once the category's attempt ceiling is reached.
    pub async fn with_retry<T, F, Fut>(&self, category: RetryCategory, mut op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let policy = self.settings.policy(category);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.total_attempts.fetch_add(1, Ordering::Relaxed);

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.successful_retries.fetch_add(1, Ordering::Relaxed);
                        debug!(category = category.as_str(), attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        category = category.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    self.failed_operations.fetch_add(1, Ordering::Relaxed);
                    if e.is_transient() {
                        error!(
                            category = category.as_str(),
                            attempt,
                            error = %e,
                            "Call failed after {} attempts",
                            attempt
                        );
                    } else {
                        error!(category = category.as_str(), error = %e, "Non-transient failure");
                    }
                    return Err(e);
                }
            }
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.total_attempts.store(0, Ordering::Relaxed);
        self.successful_retries.store(0, Ordering::Relaxed);
        self.failed_operations.store(0, Ordering::Relaxed);
    }
}
