//! Payout recording: unpaid moves to paid on the payout day only.

mod common;

use common::{assert_reconciled, at, customer, enroll, order};
use referral_ledger_core::{
    audit::AuditAction,
    engine::LedgerEngine,
    fraud::FraudSignals,
    ledger::EventStatus,
};

#[test]
fn nothing_is_paid_off_cycle() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    engine
        .on_order_finalized(&order("o-1", &customer(1), Some(&r.referral_code), 20_000_000, at(2024, 1, 10, 9)))
        .unwrap();

    assert!(engine.record_payouts(at(2024, 2, 4, 12)).unwrap().is_empty());
    assert!(engine.record_payouts(at(2024, 2, 6, 12)).unwrap().is_empty());
    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.paid_commission, 0);
}

#[test]
fn payout_day_moves_unpaid_to_paid() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);
    let first = engine
        .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), 6_000_000, at(2024, 1, 10, 9)))
        .unwrap();
    engine
        .on_order_finalized(&order("o-2", &c, None, 6_000_000, at(2024, 1, 11, 9)))
        .unwrap();
    let unpaid = engine.referrer(&r.referrer_id).unwrap().unwrap().unpaid_commission;
    assert!(unpaid > 0);

    let records = engine.record_payouts(at(2024, 2, 5, 12)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].referrer_id, r.referrer_id);
    assert_eq!(records[0].amount, unpaid);
    assert_eq!(records[0].events_marked_paid, 2);
    assert!(records[0].audit_id.is_some());

    let after = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(after.unpaid_commission, 0);
    assert_eq!(after.paid_commission, unpaid);

    let event_id = &first.event().unwrap().event_id;
    let event = engine.store.ledger_event(event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Paid);

    let last = engine.store.latest_audit_entry(&r.referrer_id).unwrap().unwrap();
    assert_eq!(last.action, AuditAction::PayoutRecorded);
    assert_eq!(last.before.unpaid, unpaid);
    assert_eq!(last.after.paid, unpaid);
    assert_reconciled(&engine);

    // The same payout day again finds nothing left to pay.
    assert!(engine.record_payouts(at(2024, 2, 5, 18)).unwrap().is_empty());
}

#[test]
fn balances_below_the_minimum_carry_over() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    engine
        .on_order_finalized(&order("o-1", &customer(1), Some(&r.referral_code), 5_000_000, at(2024, 1, 10, 9)))
        .unwrap();

    assert!(engine.record_payouts(at(2024, 2, 5, 12)).unwrap().is_empty());
    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.unpaid_commission, 50_000);
    assert_eq!(r.paid_commission, 0);
}

#[test]
fn fraud_suspects_are_held() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let honest = enroll(&engine, 1);
    let suspect = enroll(&engine, 2);
    engine
        .on_order_finalized(&order("o-1", &customer(1), Some(&honest.referral_code), 20_000_000, at(2024, 1, 10, 9)))
        .unwrap();
    engine
        .on_order_finalized(&order("o-2", &customer(2), Some(&suspect.referral_code), 20_000_000, at(2024, 1, 10, 9)))
        .unwrap();
    engine
        .evaluate_fraud(
            &suspect.referrer_id,
            Some(FraudSignals {
                shared_address_accounts: 5,
                shared_phone_accounts: 5,
                ..FraudSignals::default()
            }),
            at(2024, 1, 20, 9),
        )
        .unwrap();

    let records = engine.record_payouts(at(2024, 2, 5, 12)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].referrer_id, honest.referrer_id);

    let held = engine.referrer(&suspect.referrer_id).unwrap().unwrap();
    assert_eq!(held.paid_commission, 0);
    assert!(held.unpaid_commission > 0);
    assert_reconciled(&engine);
}
