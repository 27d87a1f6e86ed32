//! Order finalization: bracket selection, idempotency and the soft outcomes.

mod common;

use common::{assert_reconciled, at, commissioned, customer, enroll, order};
use referral_ledger_core::{
    config::PolicyConfig,
    engine::{FinalizeOutcome, LedgerEngine},
    error::LedgerError,
    ledger::{EventKind, EventStatus},
    notification::{NotificationKind, RecordingSink},
    order::OrderOutcome,
    policy::PolicyStore,
    referrer::ReferrerStatus,
    store::LedgerStore,
};
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Bracket selection
// ─────────────────────────────────────────────────────────────────────────────

/// 9.5M month-to-date + a 1M order lands at 10.5M: the whole 1M is charged at 2%.
#[test]
fn full_order_is_charged_at_post_order_band() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);

    let first = commissioned(
        engine
            .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), 9_500_000, at(2024, 3, 2, 10)))
            .unwrap(),
    );
    assert_eq!(first.tier, "bronze");
    assert_eq!(first.amount, 95_000);

    let second = commissioned(
        engine
            .on_order_finalized(&order("o-2", &c, None, 1_000_000, at(2024, 3, 9, 10)))
            .unwrap(),
    );
    assert_eq!(second.tier, "silver", "post-order revenue 10.5M is in silver");
    assert_eq!(second.rate_bps, 200);
    assert_eq!(second.amount, 20_000, "2% of the full 1M, not split across bands");
    assert_eq!(second.month_revenue_before, 9_500_000);

    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.current_month_revenue, 10_500_000);
    assert_eq!(r.lifetime_revenue, 10_500_000);
    assert_eq!(r.unpaid_commission, 115_000);
    assert_reconciled(&engine);
}

/// Month-to-date revenue starts from zero in a new calendar month.
#[test]
fn new_month_starts_from_zero() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);

    engine
        .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), 9_500_000, at(2024, 1, 20, 10)))
        .unwrap();
    let feb = commissioned(
        engine
            .on_order_finalized(&order("o-2", &c, None, 1_000_000, at(2024, 2, 1, 10)))
            .unwrap(),
    );

    assert_eq!(feb.period, "2024-02");
    assert_eq!(feb.month_revenue_before, 0);
    assert_eq!(feb.tier, "bronze");
    assert_eq!(feb.amount, 10_000);

    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.current_month_revenue, 1_000_000);
    assert_eq!(r.revenue_period.as_deref(), Some("2024-02"));
    assert_eq!(r.lifetime_revenue, 10_500_000);
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn redelivered_order_is_applied_once() {
    let (engine, sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let o = order("o-1", &customer(1), Some(&r.referral_code), 2_000_000, at(2024, 1, 5, 9));

    let event = commissioned(engine.on_order_finalized(&o).unwrap());
    let again = engine.on_order_finalized(&o).unwrap();
    match &again {
        FinalizeOutcome::AlreadyProcessed { outcome, event: existing } => {
            assert_eq!(*outcome, OrderOutcome::Commissioned);
            assert_eq!(existing.as_ref(), Some(&event), "redelivery returns the original event");
        }
        other => panic!("expected AlreadyProcessed, got {other:?}"),
    }

    let events = engine.store.events_for_order("o-1").unwrap();
    assert_eq!(events.len(), 1, "exactly one event per order");
    assert_eq!(events[0].kind, EventKind::Earned);
    assert_eq!(events[0].status, EventStatus::Calculated);

    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.unpaid_commission, 20_000, "balance reflects one application");
    assert_eq!(engine.store.audit_trail(&r.referrer_id).unwrap().len(), 1);
    assert_eq!(sink.count_of(NotificationKind::CommissionEarned), 1);
}

#[test]
fn order_without_referral_is_recorded_once() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let o = order("o-1", &customer(1), None, 500_000, at(2024, 1, 5, 9));

    assert_eq!(engine.on_order_finalized(&o).unwrap(), FinalizeOutcome::NoReferral);
    assert_eq!(
        engine.on_order_finalized(&o).unwrap(),
        FinalizeOutcome::AlreadyProcessed {
            outcome: OrderOutcome::NoReferral,
            event: None
        }
    );
    assert_eq!(engine.store.order_count().unwrap(), 1);
    assert_eq!(engine.store.ledger_event_count().unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Soft and hard outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn order_outside_validity_window_earns_nothing() {
    let mut config = PolicyConfig::default_test();
    config.referral_validity_days = Some(30);
    let (engine, _sink) = LedgerEngine::build_test_with(config).unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);

    commissioned(
        engine
            .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), 1_000_000, at(2024, 1, 1, 12)))
            .unwrap(),
    );
    let late = engine
        .on_order_finalized(&order("o-2", &c, None, 1_000_000, at(2024, 2, 15, 12)))
        .unwrap();
    assert_eq!(
        late,
        FinalizeOutcome::OutsideValidityWindow {
            referrer_id: r.referrer_id.clone()
        }
    );

    let record = engine.store.order("o-2").unwrap().unwrap();
    assert_eq!(record.outcome, OrderOutcome::NoCommission);
    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.unpaid_commission, 10_000, "only the first order earned");
    assert_reconciled(&engine);
}

#[test]
fn suspended_referrer_earns_nothing_and_fraud_suspect_still_earns() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);

    commissioned(
        engine
            .on_order_finalized(&order("o-1", &customer(1), Some(&r.referral_code), 1_000_000, at(2024, 1, 3, 9)))
            .unwrap(),
    );

    engine
        .store
        .set_referrer_status(&r.referrer_id, ReferrerStatus::FraudSuspect)
        .unwrap();
    commissioned(
        engine
            .on_order_finalized(&order("o-2", &customer(1), None, 1_000_000, at(2024, 1, 4, 9)))
            .unwrap(),
    );

    engine
        .store
        .set_referrer_status(&r.referrer_id, ReferrerStatus::Suspended)
        .unwrap();
    let outcome = engine
        .on_order_finalized(&order("o-3", &customer(1), None, 1_000_000, at(2024, 1, 5, 9)))
        .unwrap();
    assert!(
        matches!(outcome, FinalizeOutcome::NoCommission { .. }),
        "suspended referrers earn nothing, got {outcome:?}"
    );
    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.unpaid_commission, 20_000);
}

#[test]
fn negative_amount_is_rejected_without_writes() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let o = order("o-1", &customer(1), Some(&r.referral_code), -5, at(2024, 1, 5, 9));

    assert!(matches!(engine.on_order_finalized(&o), Err(LedgerError::InvalidOrder(_))));
    assert!(engine.store.order("o-1").unwrap().is_none());
}

#[test]
fn missing_policy_is_fatal() {
    let store = LedgerStore::in_memory().unwrap();
    store.migrate().unwrap();
    let engine = LedgerEngine::new(
        store,
        Arc::new(PolicyStore::empty()),
        Arc::new(RecordingSink::new()),
    );
    let o = order("o-1", &customer(1), None, 1_000, at(2024, 1, 5, 9));

    assert!(matches!(
        engine.on_order_finalized(&o),
        Err(LedgerError::PolicyUnavailable)
    ));
    assert_eq!(engine.store.order_count().unwrap(), 0, "nothing is guessed or recorded");
}

// ─────────────────────────────────────────────────────────────────────────────
// Out-of-order delivery across a month boundary
// ─────────────────────────────────────────────────────────────────────────────

/// A late January order delivered between two February orders is priced on
/// January's own revenue and leaves February's running total intact.
#[test]
fn late_prior_month_order_keeps_current_month_bracket() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);

    let jan = commissioned(
        engine
            .on_order_finalized(&order("jan-1", &c, Some(&r.referral_code), 9_950_000, at(2024, 1, 20, 9)))
            .unwrap(),
    );
    assert_eq!(jan.tier, "bronze");

    let feb_1 = commissioned(
        engine
            .on_order_finalized(&order("feb-1", &c, None, 9_000_000, at(2024, 2, 10, 9)))
            .unwrap(),
    );
    assert_eq!(feb_1.month_revenue_before, 0);
    assert_eq!(feb_1.tier, "bronze");

    // Delivered after February has started, dated January 31st.
    let late = commissioned(
        engine
            .on_order_finalized(&order("jan-2", &c, None, 100_000, at(2024, 1, 31, 9)))
            .unwrap(),
    );
    assert_eq!(late.period, "2024-01");
    assert_eq!(late.month_revenue_before, 9_950_000, "January's own month-to-date");
    assert_eq!(late.tier, "silver", "January reaches 10.05M");
    assert_eq!(late.amount, 2_000);

    let feb_2 = commissioned(
        engine
            .on_order_finalized(&order("feb-2", &c, None, 1_000_000, at(2024, 2, 11, 9)))
            .unwrap(),
    );
    assert_eq!(feb_2.month_revenue_before, 9_000_000);
    assert_eq!(feb_2.tier, "silver");
    assert_eq!(feb_2.amount, 20_000);

    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.revenue_period.as_deref(), Some("2024-02"));
    assert_eq!(r.current_month_revenue, 10_000_000);
    assert_eq!(r.lifetime_revenue, 9_950_000 + 9_000_000 + 100_000 + 1_000_000);
    assert_reconciled(&engine);
}

#[test]
fn lifetime_revenue_overflow_is_rejected_without_writes() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);
    commissioned(
        engine
            .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), i64::MAX - 10, at(2024, 1, 5, 9)))
            .unwrap(),
    );

    // A new month starts from zero, so only the lifetime total overflows.
    let err = engine
        .on_order_finalized(&order("o-2", &c, None, 100, at(2024, 2, 5, 9)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOrder(_)), "got {err:?}");
    assert!(engine.store.order("o-2").unwrap().is_none());
    assert_eq!(engine.store.ledger_event_count().unwrap(), 1);

    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.lifetime_revenue, i64::MAX - 10);
}
