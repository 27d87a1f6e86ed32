//! Reconciliation over randomized, seeded workloads.
//!
//! For every referrer, after any mix of orders, redeliveries, early and
//! late reversals and payouts:
//!   unpaid + paid - clawback_due == Σ non-reversed earned amounts
//! and the latest audit entry's after-balance equals the stored balance.

mod common;

use common::assert_reconciled;
use referral_ledger_core::{
    config::{ClawbackStrategy, PolicyConfig},
    engine::LedgerEngine,
    ledger::EventKind,
    workload::{self, Workload, WorkloadConfig},
};
use std::collections::HashMap;

fn drive_seed(config: PolicyConfig, seed: u64) -> LedgerEngine {
    let (engine, _sink) = LedgerEngine::build_test_with(config).expect("build_test");
    let w = Workload::generate(&WorkloadConfig::default(), seed);
    let summary = workload::drive(&engine, &w).expect("drive");
    assert!(summary.commissioned > 0, "seed {seed}: nothing was commissioned");
    assert!(
        summary.reversed > 0,
        "seed {seed}: no reversals were applied ({summary:?})"
    );
    engine
}

// ─────────────────────────────────────────────────────────────────────────────
// Balance invariant
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balances_reconcile_across_seeds() {
    let _ = env_logger::builder().is_test(true).try_init();
    for seed in [1u64, 7, 42, 1337] {
        let engine = drive_seed(PolicyConfig::default_test(), seed);
        assert_reconciled(&engine);
    }
}

#[test]
fn balances_reconcile_with_auto_claw_back() {
    let mut config = PolicyConfig::default_test();
    config.clawback_strategy = ClawbackStrategy::AutoClawBack;
    for seed in [3u64, 11] {
        let engine = drive_seed(config.clone(), seed);
        assert_reconciled(&engine);
        for r in engine.store.all_referrers().unwrap() {
            assert_eq!(r.clawback_due, 0, "auto claw-back never defers to review");
        }
        assert!(engine.store.open_clawback_reviews().unwrap().is_empty());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger shape
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn every_reversal_offsets_exactly_one_earned_event() {
    let engine = drive_seed(PolicyConfig::default_test(), 42);
    let events = engine.store.all_events().unwrap();

    let earned: HashMap<&str, _> = events
        .iter()
        .filter(|e| e.kind == EventKind::Earned)
        .map(|e| (e.event_id.as_str(), e))
        .collect();
    let mut earned_per_order: HashMap<&str, usize> = HashMap::new();
    for e in earned.values() {
        *earned_per_order.entry(e.order_id.as_str()).or_default() += 1;
    }
    assert!(
        earned_per_order.values().all(|&n| n == 1),
        "an order was commissioned more than once"
    );

    for reversal in events.iter().filter(|e| e.kind == EventKind::Reversed) {
        let original_id = reversal
            .reverses_event_id
            .as_deref()
            .expect("reversal must link its original");
        let original = earned[original_id];
        assert_eq!(reversal.amount, -original.amount, "reversal must negate exactly");
        assert_eq!(reversal.order_id, original.order_id);
        assert!(original.reversed, "original must be flagged reversed");
        assert_eq!(
            original.reversed_by_event_id.as_deref(),
            Some(reversal.event_id.as_str()),
            "link must be one-to-one"
        );
    }
}

#[test]
fn audit_trail_has_one_entry_per_balance_change() {
    let engine = drive_seed(PolicyConfig::default_test(), 7);
    for r in engine.store.all_referrers().unwrap() {
        let trail = engine.store.audit_trail(&r.referrer_id).unwrap();
        for pair in trail.windows(2) {
            assert_eq!(
                pair[0].after, pair[1].before,
                "audit chain for {} is broken between entries {:?} and {:?}",
                r.referrer_id, pair[0].audit_id, pair[1].audit_id
            );
        }
    }
}
