//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use referral_ledger_core::{
    engine::{FinalizeOutcome, LedgerEngine},
    ledger::LedgerEvent,
    order::{CustomerIdentity, FinalizedOrder, PaymentMethod},
    referrer::{ContactIdentity, Referrer},
};

pub fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap()
}

pub fn contact(n: usize) -> ContactIdentity {
    ContactIdentity {
        name: format!("Referrer {n}"),
        email: format!("referrer{n}@example.test"),
        phone: Some(format!("+1555{n:07}")),
    }
}

pub fn enroll(engine: &LedgerEngine, n: usize) -> Referrer {
    engine.enroll(&contact(n), at(2024, 1, 1, 0)).unwrap()
}

pub fn customer(n: usize) -> CustomerIdentity {
    CustomerIdentity {
        customer_id: format!("cust-{n:04}"),
        email: format!("customer{n}@example.test"),
        phone: Some(format!("+1666{n:07}")),
    }
}

pub fn order(
    order_id: &str,
    customer: &CustomerIdentity,
    code: Option<&str>,
    amount: i64,
    finalized_at: DateTime<Utc>,
) -> FinalizedOrder {
    FinalizedOrder {
        order_id: order_id.to_string(),
        amount,
        customer: customer.clone(),
        referral_code: code.map(str::to_string),
        finalized_at,
        payment_method: PaymentMethod::Prepaid,
        shipping_address: Some(format!("{} Elm Street", customer.customer_id)),
    }
}

/// Unwrap a `Commissioned` outcome or fail the test.
pub fn commissioned(outcome: FinalizeOutcome) -> LedgerEvent {
    match outcome {
        FinalizeOutcome::Commissioned { event, .. } => event,
        other => panic!("expected a commission, got {other:?}"),
    }
}

pub fn assert_reconciled(engine: &LedgerEngine) {
    for report in engine.reconcile_all().unwrap() {
        assert!(
            report.is_clean(),
            "referrer {} out of balance: {:?} vs ledger {} (audit {:?})",
            report.referrer_id,
            report.balances,
            report.ledger_total,
            report.audit_after
        );
    }
}

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
