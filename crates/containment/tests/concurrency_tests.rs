//! Concurrency properties of the primitives
//!
//! Thread-based checks of the invariants the containment layer promises
//! under parallel callers: atomic budget admission, half-open single
//! flight, token reservation accounting, and audit-chain integrity.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use veronica_containment::audit::AuditLog;
use veronica_containment::policy::{BudgetEnforcer, CircuitBreaker, RuntimePolicy};
use veronica_containment::shield::{PreDispatchHook, TokenBudgetHook};
use veronica_containment::types::{PolicyContext, ToolCallContext};

// Under N racing equal spends, exactly limit/amount succeed.
#[test]
fn budget_admits_exactly_floor_of_limit_over_amount() {
    let budget = Arc::new(BudgetEnforcer::new(2.0));
    let barrier = Arc::new(std::sync::Barrier::new(40));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let budget = budget.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                budget.spend(0.25).unwrap()
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 8);
    assert!((budget.spent_usd() - 2.0).abs() < 1e-6);
}

// Ten concurrent checks against a half-open breaker admit exactly one.
#[test]
fn half_open_breaker_admits_one_probe_across_threads() {
    let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(0)));
    breaker.record_failure();

    let barrier = Arc::new(std::sync::Barrier::new(10));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let breaker = breaker.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                breaker.check(&PolicyContext::new())
            })
        })
        .collect();
    let decisions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(decisions.iter().filter(|d| d.allowed).count(), 1);
    for denied in decisions.iter().filter(|d| !d.allowed) {
        assert!(
            denied.reason.contains("already in flight"),
            "unexpected denial reason: {}",
            denied.reason
        );
    }

    // The probe outcome releases the slot for the next round.
    breaker.record_success();
    assert!(breaker.check(&PolicyContext::new()).allowed);
}

// Committed plus pending totals never exceed the cap plus one in-flight
// reservation set, and the degrade band fires where configured.
#[test]
fn token_reservations_bound_concurrent_admissions() {
    let hook = Arc::new(TokenBudgetHook::new(1_000, 0, 0.8));
    let barrier = Arc::new(std::sync::Barrier::new(20));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let hook = hook.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                let ctx = ToolCallContext::new(format!("req-{}", i)).with_tokens(0, 100);
                match hook.before_llm_call(&ctx) {
                    None => {
                        hook.record_usage(100, 0);
                        true
                    }
                    Some(_) => false,
                }
            })
        })
        .collect();
    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    // The degrade band starts at 800 projected tokens, so at most 8 calls
    // are admitted cleanly no matter the interleaving.
    assert!(admitted <= 8, "admitted {}", admitted);
    let total = hook.output_total() + hook.pending_output();
    assert!(total <= 1_000 + 100);

    // The next caller lands in the degrade band or beyond.
    let ctx = ToolCallContext::new("req-final").with_tokens(0, 100);
    assert!(hook.before_llm_call(&ctx).is_some());
}

// Ten writers, one hundred appends each: the chain stays verifiable and
// complete, including from a fresh handle on the same file.
#[test]
fn audit_chain_survives_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let log = Arc::new(AuditLog::new(&path));

    let handles: Vec<_> = (0..10)
        .map(|writer| {
            let log = log.clone();
            std::thread::spawn(move || {
                for seq in 0..100 {
                    log.write("CONCURRENT_WRITE", json!({"writer": writer, "seq": seq}))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().filter(|l| !l.trim().is_empty()).count(), 1_000);
    assert!(log.verify_chain());

    let reopened = AuditLog::new(&path);
    assert!(reopened.verify_chain());
}

// check() and record_*() interleavings never lose a breaker transition.
#[test]
fn breaker_trips_exactly_at_threshold_under_interleaved_checks() {
    let breaker = Arc::new(CircuitBreaker::new(50, Duration::from_secs(3600)));

    let failer = {
        let breaker = breaker.clone();
        std::thread::spawn(move || {
            for _ in 0..50 {
                breaker.record_failure();
            }
        })
    };
    let checker = {
        let breaker = breaker.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                let _ = breaker.check(&PolicyContext::new());
            }
        })
    };
    failer.join().unwrap();
    checker.join().unwrap();

    assert_eq!(breaker.failure_count(), 50);
    assert!(!breaker.check(&PolicyContext::new()).allowed);
}
