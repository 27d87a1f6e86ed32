//! Reversal engine. Offsets a commissioned order exactly once.
//!
//! Outcomes:
//!   order never seen          -> parked, `Deferred` (applied once the commission lands)
//!   seen, never commissioned  -> `NoOp`
//!   earned event reversed     -> `AlreadyReversed`
//!   otherwise                 -> `Reversed` with a linked event of -amount
//!
//! Only the unpaid balance is reduced automatically. Any excess is handled
//! by the policy's `ClawbackStrategy`.

use crate::{
    audit::{self, AuditAction, AuditEntry},
    config::{ClawbackStrategy, PolicyConfig},
    error::{LedgerError, LedgerResult},
    ledger::{new_event_id, EventKind, EventStatus, LedgerEvent, ReversalReason},
    notification::{QueuedNotification, ReferrerNotification},
    store::LedgerStore,
    types::Money,
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct ReversedCommission {
    pub original: LedgerEvent,
    pub reversal: LedgerEvent,
    pub audit: AuditEntry,
    /// Part of the original amount NOT covered by the unpaid balance.
    pub excess: Money,
    pub notifications: Vec<QueuedNotification>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReversalOutcome {
    Reversed(Box<ReversedCommission>),
    AlreadyReversed(LedgerEvent),
    NoOp,
    /// Arrived before the order was finalized; parked for later.
    Deferred,
}

/// `reverse(orderId, reason)`. Runs inside the caller's transaction.
pub fn reverse(
    store: &LedgerStore,
    policy: &PolicyConfig,
    order_id: &str,
    reason: ReversalReason,
    now: DateTime<Utc>,
) -> LedgerResult<ReversalOutcome> {
    let Some(order) = store.order(order_id)? else {
        store.park_reversal(order_id, reason, now)?;
        log::info!("Reversal for unseen order {order_id} parked until it is finalized");
        return Ok(ReversalOutcome::Deferred);
    };

    if order.reversal_reason.is_none() {
        store.mark_order_reversed(order_id, reason, now)?;
    }

    let Some(event_id) = order.earned_event_id else {
        log::debug!("Order {order_id} earned no commission; nothing to reverse");
        return Ok(ReversalOutcome::NoOp);
    };
    let original = store.ledger_event(&event_id)?.ok_or_else(|| {
        LedgerError::Inconsistent(format!("order {order_id} points at missing event {event_id}"))
    })?;
    if original.reversed {
        log::debug!("Event {} already reversed", original.event_id);
        return Ok(ReversalOutcome::AlreadyReversed(original));
    }

    let referrer = store.require_referrer(&original.referrer_id)?;
    let amount = original.amount;
    let from_unpaid = amount.min(referrer.unpaid_commission.max(0));
    let excess = amount - from_unpaid;

    let reversal = LedgerEvent {
        event_id: new_event_id(),
        referrer_id: original.referrer_id.clone(),
        order_id: original.order_id.clone(),
        order_amount: original.order_amount,
        month_revenue_before: original.month_revenue_before,
        tier: original.tier.clone(),
        rate_bps: original.rate_bps,
        amount: -amount,
        kind: EventKind::Reversed,
        status: EventStatus::Calculated,
        period: original.period.clone(),
        reversed: false,
        reversal_reason: Some(reason),
        reverses_event_id: Some(original.event_id.clone()),
        reversed_by_event_id: None,
        created_at: now,
    };
    store.insert_ledger_event(&reversal)?;
    store.mark_event_reversed(&original.event_id, reason, &reversal.event_id)?;

    let before = referrer.balances();
    let mut updated = referrer.clone();
    updated.unpaid_commission -= from_unpaid;
    if excess > 0 {
        match policy.clawback_strategy {
            ClawbackStrategy::FlagForReview => {
                updated.clawback_due += excess;
                store.insert_clawback_review(
                    &referrer.referrer_id,
                    order_id,
                    &original.event_id,
                    excess,
                    now,
                )?;
                log::warn!(
                    "Reversal of {order_id} exceeds unpaid balance of {} by {excess}; queued for review",
                    referrer.referrer_id
                );
            }
            ClawbackStrategy::AutoClawBack => {
                updated.paid_commission -= excess;
                log::warn!(
                    "Reversal of {order_id} clawed {excess} back from paid balance of {}",
                    referrer.referrer_id
                );
            }
        }
    }
    store.update_referrer_balances(&updated, referrer.version)?;

    let audit = audit::record(
        store,
        &referrer.referrer_id,
        AuditAction::CommissionReversed,
        reason.as_str(),
        (Some(order_id), Some(&reversal.event_id)),
        before,
        updated.balances(),
        now,
    )?;

    let notifications = vec![store.enqueue_notification(
        &ReferrerNotification::CommissionReversed {
            referrer_id: referrer.referrer_id.clone(),
            order_id: order_id.to_string(),
            event_id: reversal.event_id.clone(),
            amount: -amount,
            reason: reason.as_str().to_string(),
        },
        Some(&original.period),
        now,
    )?];

    log::info!(
        "Reversed {} on order {order_id} ({}): {}",
        original.event_id,
        reason.as_str(),
        -amount
    );

    let mut original = original;
    original.reversed = true;
    original.reversal_reason = Some(reason);
    original.reversed_by_event_id = Some(reversal.event_id.clone());

    Ok(ReversalOutcome::Reversed(Box::new(ReversedCommission {
        original,
        reversal,
        audit,
        excess,
        notifications,
    })))
}
