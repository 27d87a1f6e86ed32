//! Attribution resolver: code validation, self-referral, locking.

mod common;

use common::{at, commissioned, contact, customer, enroll, order};
use referral_ledger_core::{
    attribution::LinkChange,
    config::PolicyConfig,
    engine::LedgerEngine,
    error::LedgerError,
    order::CustomerIdentity,
    referrer::ReferrerStatus,
};

// ─────────────────────────────────────────────────────────────────────────────
// Code validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unknown_code_is_rejected() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    enroll(&engine, 1);

    let err = engine.resolve("ZZZZZZZZ", &customer(1), at(2024, 1, 2, 0)).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidCode { .. }), "got {err:?}");
    assert!(engine.store.attribution_for_customer("cust-0001").unwrap().is_none());
}

#[test]
fn pending_referrer_code_is_not_valid_until_approved() {
    let mut config = PolicyConfig::default_test();
    config.require_approval = true;
    let (engine, _sink) = LedgerEngine::build_test_with(config).unwrap();
    let r = enroll(&engine, 1);
    assert_eq!(r.status, ReferrerStatus::PendingApproval);

    let err = engine
        .resolve(&r.referral_code, &customer(1), at(2024, 1, 2, 0))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidCode { .. }));

    engine.approve(&r.referrer_id).unwrap();
    let a = engine
        .resolve(&r.referral_code, &customer(1), at(2024, 1, 2, 0))
        .unwrap();
    assert_eq!(a.referrer.referrer_id, r.referrer_id);
    assert!(matches!(
        engine.approve(&r.referrer_id),
        Err(LedgerError::UnexpectedStatus { .. })
    ));
}

#[test]
fn codes_match_case_insensitively() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);

    let a = engine
        .resolve(&format!(" {} ", r.referral_code.to_lowercase()), &customer(1), at(2024, 1, 2, 0))
        .unwrap();
    assert_eq!(a.referrer.referrer_id, r.referrer_id);
    assert_eq!(a.link.referral_code, r.referral_code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Self-referral
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn self_referral_is_rejected_and_creates_no_link() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let me = CustomerIdentity {
        customer_id: "cust-self".into(),
        email: contact(1).email.to_uppercase(),
        phone: None,
    };

    let err = engine.resolve(&r.referral_code, &me, at(2024, 1, 2, 0)).unwrap_err();
    assert!(matches!(err, LedgerError::SelfReferral { .. }), "got {err:?}");
    assert!(engine.store.attribution_for_customer("cust-self").unwrap().is_none());

    let err = engine
        .on_order_finalized(&order("o-1", &me, Some(&r.referral_code), 1_000_000, at(2024, 1, 3, 0)))
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfReferral { .. }));
    assert!(
        engine.store.order("o-1").unwrap().is_none(),
        "a rejected order is not marked processed, so it can be retried"
    );
    let r = engine.referrer(&r.referrer_id).unwrap().unwrap();
    assert_eq!(r.referred_customers, 0);
    assert_eq!(r.unpaid_commission, 0);
}

#[test]
fn self_referral_allowed_when_policy_disables_the_block() {
    let mut config = PolicyConfig::default_test();
    config.block_self_referral = false;
    let (engine, _sink) = LedgerEngine::build_test_with(config).unwrap();
    let r = enroll(&engine, 1);
    let me = CustomerIdentity {
        customer_id: "cust-self".into(),
        email: contact(1).email,
        phone: None,
    };

    let a = engine.resolve(&r.referral_code, &me, at(2024, 1, 2, 0)).unwrap();
    assert_eq!(a.change, LinkChange::Created);
}

// ─────────────────────────────────────────────────────────────────────────────
// Locking
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn locked_link_ignores_later_codes() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let a = enroll(&engine, 1);
    let b = enroll(&engine, 2);
    let c = customer(1);

    let first = engine.resolve(&a.referral_code, &c, at(2024, 1, 2, 0)).unwrap();
    assert_eq!(first.change, LinkChange::Created);
    assert!(first.link.locked, "links lock on creation by default");

    let second = engine.resolve(&b.referral_code, &c, at(2024, 1, 3, 0)).unwrap();
    assert_eq!(second.change, LinkChange::Unchanged);
    assert_eq!(second.referrer.referrer_id, a.referrer_id, "locking is final");

    let again = engine.resolve(&a.referral_code, &c, at(2024, 1, 4, 0)).unwrap();
    assert_eq!(again.change, LinkChange::Unchanged);

    assert_eq!(engine.referrer(&a.referrer_id).unwrap().unwrap().referred_customers, 1);
    assert_eq!(engine.referrer(&b.referrer_id).unwrap().unwrap().referred_customers, 0);
}

#[test]
fn later_order_codes_credit_the_original_referrer() {
    let (engine, _sink) = LedgerEngine::build_test().unwrap();
    let a = enroll(&engine, 1);
    let b = enroll(&engine, 2);
    let c = customer(1);

    commissioned(
        engine
            .on_order_finalized(&order("o-1", &c, Some(&a.referral_code), 1_000_000, at(2024, 1, 2, 0)))
            .unwrap(),
    );
    let second = commissioned(
        engine
            .on_order_finalized(&order("o-2", &c, Some(&b.referral_code), 1_000_000, at(2024, 1, 3, 0)))
            .unwrap(),
    );
    assert_eq!(second.referrer_id, a.referrer_id);
    assert_eq!(engine.referrer(&b.referrer_id).unwrap().unwrap().unpaid_commission, 0);
}

#[test]
fn code_change_before_first_order_when_policy_allows() {
    let mut config = PolicyConfig::default_test();
    config.allow_code_change_before_first_order = true;
    let (engine, _sink) = LedgerEngine::build_test_with(config).unwrap();
    let a = enroll(&engine, 1);
    let b = enroll(&engine, 2);
    let c = customer(1);

    let first = engine.resolve(&a.referral_code, &c, at(2024, 1, 2, 0)).unwrap();
    assert!(!first.link.locked, "stays open until the first order");

    let moved = engine.resolve(&b.referral_code, &c, at(2024, 1, 3, 0)).unwrap();
    assert_eq!(moved.change, LinkChange::Reassigned);
    assert_eq!(engine.referrer(&a.referrer_id).unwrap().unwrap().referred_customers, 0);
    assert_eq!(engine.referrer(&b.referrer_id).unwrap().unwrap().referred_customers, 1);

    let event = commissioned(
        engine
            .on_order_finalized(&order("o-1", &c, None, 1_000_000, at(2024, 1, 4, 0)))
            .unwrap(),
    );
    assert_eq!(event.referrer_id, b.referrer_id);
    assert!(
        engine.store.attribution_for_customer(&c.customer_id).unwrap().unwrap().locked,
        "the first commissioned order locks the link"
    );

    let after = engine.resolve(&a.referral_code, &c, at(2024, 1, 5, 0)).unwrap();
    assert_eq!(after.change, LinkChange::Unchanged);
    assert_eq!(after.referrer.referrer_id, b.referrer_id);
}
