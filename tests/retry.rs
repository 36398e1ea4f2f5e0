//! Retry Behavior Tests
//!
//! Attempt counts per error class, using zero-wait policies.

use std::sync::atomic::{AtomicU32, Ordering};

use autopilot::adapters::CallError;
use autopilot::core::{RetryCategory, RetryHandler, RetryPolicy, RetrySettings};

async fn run_script(handler: &RetryHandler, category: RetryCategory, failures: Vec<CallError>) -> (Result<u32, CallError>, u32) {
    let calls = AtomicU32::new(0);
    let failures = std::sync::Mutex::new(failures.into_iter());

    let result = handler
        .with_retry(category, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let next = failures.lock().unwrap().next();
            async move {
                match next {
                    Some(e) => Err(e),
                    None => Ok(n),
                }
            }
        })
        .await;

    (result, calls.load(Ordering::SeqCst))
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let handler = RetryHandler::new(RetrySettings::immediate(4));
    let failures = vec![
        CallError::Timeout("slow".into()),
        CallError::Connection("reset".into()),
        CallError::from_status(429, "rate limited"),
    ];

    let (result, calls) = run_script(&handler, RetryCategory::Generative, failures).await;

    assert_eq!(result.unwrap(), 4);
    assert_eq!(calls, 4);
    let stats = handler.stats();
    assert_eq!(stats.total_attempts, 4);
    assert_eq!(stats.successful_retries, 1);
    assert_eq!(stats.failed_operations, 0);
}

#[tokio::test]
async fn test_persistent_transient_failure_stops_at_ceiling() {
    let handler = RetryHandler::new(RetrySettings::immediate(3));
    let failures = (0..10).map(|_| CallError::from_status(503, "down")).collect();

    let (result, calls) = run_script(&handler, RetryCategory::Storefront, failures).await;

    assert!(matches!(result, Err(CallError::Unavailable { status: 503, .. })));
    assert_eq!(calls, 3);
    assert_eq!(handler.stats().failed_operations, 1);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let handler = RetryHandler::new(RetrySettings::immediate(5));
    let failures = vec![CallError::from_status(400, "bad request")];

    let (result, calls) = run_script(&handler, RetryCategory::Source, failures).await;

    assert!(matches!(result, Err(CallError::Rejected { status: 400, .. })));
    assert_eq!(calls, 1);
    let stats = handler.stats();
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(stats.failed_operations, 1);
}

#[tokio::test]
async fn test_categories_use_their_own_ceiling() {
    let settings = RetrySettings {
        source: RetryPolicy::immediate(2),
        generative: RetryPolicy::immediate(5),
        storefront: RetryPolicy::immediate(1),
    };
    let handler = RetryHandler::new(settings);
    let always_down = || (0..10).map(|_| CallError::Timeout("slow".into())).collect::<Vec<_>>();

    let (_, source_calls) = run_script(&handler, RetryCategory::Source, always_down()).await;
    let (_, generative_calls) = run_script(&handler, RetryCategory::Generative, always_down()).await;
    let (_, storefront_calls) = run_script(&handler, RetryCategory::Storefront, always_down()).await;

    assert_eq!(source_calls, 2);
    assert_eq!(generative_calls, 5);
    assert_eq!(storefront_calls, 1);
    assert_eq!(handler.stats().failed_operations, 3);
}

#[tokio::test]
async fn test_zero_attempt_policy_still_calls_once() {
    let handler = RetryHandler::new(RetrySettings::immediate(0));
    let (result, calls) = run_script(&handler, RetryCategory::Generative, Vec::new()).await;
    assert_eq!(result.unwrap(), 1);
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn test_budget_errors_are_never_retried() {
    use autopilot::core::BudgetExceeded;

    let handler = RetryHandler::new(RetrySettings::immediate(4));
    let failures = vec![CallError::Budget(BudgetExceeded::RunUsd {
        projected: 5.5,
        limit: 5.0,
    })];

    let (result, calls) = run_script(&handler, RetryCategory::Generative, failures).await;
    assert!(result.unwrap_err().as_budget().is_some());
    assert_eq!(calls, 1);
}
