//! Audit Logger Tests
//!
//! Concurrent writers sharing one on-disk ledger.

use std::thread;

use serde_json::json;
use tempfile::TempDir;

use autopilot::core::{AuditLogger, Ledger};
use autopilot::domain::RunId;

#[test]
fn test_concurrent_logging_keeps_history_ordered() {
    let temp = TempDir::new().unwrap();
    let ledger = Ledger::open(temp.path().join("autopilot.db")).unwrap();
    let run_id = RunId::new();

    thread::scope(|scope| {
        for writer in 0..4 {
            let audit = AuditLogger::new(ledger.clone());
            scope.spawn(move || {
                for i in 0..25 {
                    let own = format!("cand_{}", writer);
                    let details = Some(json!({ "i": i }));
                    assert!(audit.log("post_ingested", Some(&own), Some(run_id), details, false, false));
                    assert!(audit.log("error_occurred", Some("shared"), Some(run_id), None, false, false));
                }
            });
        }
    });

    let audit = AuditLogger::new(ledger);
    for writer in 0..4 {
        let history = audit.get_candidate_history(&format!("cand_{}", writer)).unwrap();
        assert_eq!(history.len(), 25);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    let shared = audit.get_candidate_history("shared").unwrap();
    assert_eq!(shared.len(), 100);
    assert!(shared.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(shared.iter().all(|e| e.error));

    assert_eq!(audit.get_run_history(run_id).unwrap().len(), 200);
}

