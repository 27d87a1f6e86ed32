//! Tier progress notifications: once per referrer per month.

mod common;

use common::{at, customer, enroll, order};
use referral_ledger_core::{
    engine::{FinalizeOutcome, LedgerEngine},
    notification::{NotificationKind, ReferrerNotification},
};

fn progress_of(outcome: FinalizeOutcome) -> referral_ledger_core::notifier::TierProgress {
    match outcome {
        FinalizeOutcome::Commissioned { progress, .. } => progress,
        other => panic!("expected a commission, got {other:?}"),
    }
}

#[test]
fn crossing_the_threshold_notifies_once_per_month() {
    let (engine, sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);

    let first = progress_of(
        engine
            .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), 8_100_000, at(2024, 1, 5, 9)))
            .unwrap(),
    );
    assert!(first.should_notify);
    assert_eq!(first.current_tier, "bronze");
    assert_eq!(first.next_tier.as_deref(), Some("silver"));
    assert_eq!(first.remaining_amount, Some(1_900_000));

    let second = progress_of(
        engine
            .on_order_finalized(&order("o-2", &c, None, 500_000, at(2024, 1, 6, 9)))
            .unwrap(),
    );
    assert!(!second.should_notify, "already notified this month");
    assert_eq!(sink.count_of(NotificationKind::TierProgress), 1);

    // A new month starts from zero revenue and may notify again.
    let february = progress_of(
        engine
            .on_order_finalized(&order("o-3", &c, None, 8_500_000, at(2024, 2, 5, 9)))
            .unwrap(),
    );
    assert!(february.should_notify);
    assert_eq!(sink.count_of(NotificationKind::TierProgress), 2);
    assert_eq!(
        engine
            .store
            .notification_count(&r.referrer_id, NotificationKind::TierProgress)
            .unwrap(),
        2
    );
}

#[test]
fn progress_payload_names_the_next_tier() {
    let (engine, sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    engine
        .on_order_finalized(&order("o-1", &customer(1), Some(&r.referral_code), 9_000_000, at(2024, 3, 4, 9)))
        .unwrap();

    let progress = sink
        .sent()
        .into_iter()
        .find(|n| n.kind() == NotificationKind::TierProgress)
        .expect("tier progress notification");
    match progress {
        ReferrerNotification::TierProgress {
            referrer_id,
            period,
            current_tier,
            next_tier,
            remaining_amount,
            progress,
        } => {
            assert_eq!(referrer_id, r.referrer_id);
            assert_eq!(period, "2024-03");
            assert_eq!(current_tier, "bronze");
            assert_eq!(next_tier, "silver");
            assert_eq!(remaining_amount, 1_000_000);
            assert!((progress - 0.9).abs() < 1e-9);
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[test]
fn below_threshold_sends_only_the_earned_notice() {
    let (engine, sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    engine
        .on_order_finalized(&order("o-1", &customer(1), Some(&r.referral_code), 7_000_000, at(2024, 1, 5, 9)))
        .unwrap();

    assert_eq!(sink.count_of(NotificationKind::CommissionEarned), 1);
    assert_eq!(sink.count_of(NotificationKind::TierProgress), 0);
}

#[test]
fn top_band_never_notifies() {
    let (engine, sink) = LedgerEngine::build_test().unwrap();
    let r = enroll(&engine, 1);
    let c = customer(1);

    engine
        .on_order_finalized(&order("o-1", &c, Some(&r.referral_code), 60_000_000, at(2024, 1, 5, 9)))
        .unwrap();
    let top = progress_of(
        engine
            .on_order_finalized(&order("o-2", &c, None, 1_000_000, at(2024, 1, 6, 9)))
            .unwrap(),
    );
    assert_eq!(top.current_tier, "gold");
    assert!(top.next_tier.is_none());
    assert!(!top.should_notify);
    assert_eq!(sink.count_of(NotificationKind::TierProgress), 0);
}
