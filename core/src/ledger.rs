//! Ledger writer: turns a calculated commission into an immutable event.
//!
//! One call applies, in the caller's transaction:
//!   1. the `earned` ledger event (status = calculated)
//!   2. the referrer balance update (optimistic version check)
//!   3. the audit entry with before/after balances
//!   4. the order's processed marker (+ attribution lock)
//! If any step fails the transaction rolls back all four.

use crate::{
    attribution::AttributionLink,
    audit::{self, AuditAction, AuditEntry},
    commission,
    config::PolicyConfig,
    error::{LedgerError, LedgerResult},
    notification::{QueuedNotification, ReferrerNotification},
    notifier::{self, TierProgress},
    order::{FinalizedOrder, OrderOutcome, OrderRecord},
    referrer::Referrer,
    store::LedgerStore,
    types::{BasisPoints, EventId, Money, OrderId, ParseEnumError, Period, ReferrerId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Earned,
    Reversed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Reversed => "reversed",
        }
    }
}

impl FromStr for EventKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earned" => Ok(Self::Earned),
            "reversed" => Ok(Self::Reversed),
            other => Err(ParseEnumError::new("event kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Calculated,
    Paid,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculated => "calculated",
            Self::Paid => "paid",
        }
    }
}

impl FromStr for EventStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calculated" => Ok(Self::Calculated),
            "paid" => Ok(Self::Paid),
            other => Err(ParseEnumError::new("event status", other)),
        }
    }
}

/// Closed set of reasons an `OnOrderReversed` signal may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalReason {
    OrderReturned,
    OrderCancelled,
    FraudDetected,
}

impl ReversalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderReturned => "order_returned",
            Self::OrderCancelled => "order_cancelled",
            Self::FraudDetected => "fraud_detected",
        }
    }
}

impl FromStr for ReversalReason {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_returned" => Ok(Self::OrderReturned),
            "order_cancelled" => Ok(Self::OrderCancelled),
            "fraud_detected" => Ok(Self::FraudDetected),
            other => Err(ParseEnumError::new("reversal reason", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: EventId,
    pub referrer_id: ReferrerId,
    pub order_id: OrderId,
    pub order_amount: Money,
    /// Referrer's month-to-date revenue before this order.
    pub month_revenue_before: Money,
    pub tier: String,
    pub rate_bps: BasisPoints,
    /// Signed; negative for reversals.
    pub amount: Money,
    pub kind: EventKind,
    pub status: EventStatus,
    pub period: String,
    pub reversed: bool,
    pub reversal_reason: Option<ReversalReason>,
    /// On a reversal event: the earned event it offsets.
    pub reverses_event_id: Option<EventId>,
    /// On an earned event: the reversal that offset it.
    pub reversed_by_event_id: Option<EventId>,
    pub created_at: DateTime<Utc>,
}

pub fn new_event_id() -> EventId {
    format!("evt-{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedCommission {
    pub event: LedgerEvent,
    pub referrer: Referrer,
    pub audit: AuditEntry,
    pub progress: TierProgress,
    pub notifications: Vec<QueuedNotification>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied(Box<AppliedCommission>),
    /// The order already carries a processed marker; nothing was written.
    AlreadyProcessed {
        record: OrderRecord,
        event: Option<LedgerEvent>,
    },
}

/// `applyCommission(order, referrer)`.
pub fn apply_commission(
    store: &LedgerStore,
    policy: &PolicyConfig,
    order: &FinalizedOrder,
    referrer: &Referrer,
    link: &AttributionLink,
) -> LedgerResult<ApplyOutcome> {
    if let Some(record) = store.order(&order.order_id)? {
        let event = match &record.earned_event_id {
            Some(id) => store.ledger_event(id)?,
            None => None,
        };
        log::debug!("Order {} already processed ({})", order.order_id, record.outcome.as_str());
        return Ok(ApplyOutcome::AlreadyProcessed { record, event });
    }
    if let Some(event) = store.earned_event_for_order(&order.order_id)? {
        return Err(LedgerError::Inconsistent(format!(
            "order {} has earned event {} but no processed marker",
            order.order_id, event.event_id
        )));
    }

    let now = order.finalized_at;
    let period = Period::of(now);
    // Read from the ledger so late deliveries for an earlier month price correctly.
    let month_revenue_before = store.month_revenue(&referrer.referrer_id, &period.key())?;
    let calc = commission::calculate(order.amount, month_revenue_before, &policy.tiers)?;

    let event = LedgerEvent {
        event_id: new_event_id(),
        referrer_id: referrer.referrer_id.clone(),
        order_id: order.order_id.clone(),
        order_amount: order.amount,
        month_revenue_before,
        tier: calc.tier.clone(),
        rate_bps: calc.rate_bps,
        amount: calc.amount,
        kind: EventKind::Earned,
        status: EventStatus::Calculated,
        period: period.key(),
        reversed: false,
        reversal_reason: None,
        reverses_event_id: None,
        reversed_by_event_id: None,
        created_at: now,
    };
    store.insert_ledger_event(&event)?;

    let before = referrer.balances();
    let mut updated = referrer.clone();
    if referrer.advances_revenue_period(&period) {
        updated.current_month_revenue = calc.new_month_to_date_revenue;
        updated.revenue_period = Some(period.key());
    }
    updated.lifetime_revenue = referrer
        .lifetime_revenue
        .checked_add(order.amount)
        .ok_or_else(|| {
            LedgerError::InvalidOrder(format!(
                "order {} overflows lifetime revenue of {}",
                order.order_id, referrer.referrer_id
            ))
        })?;
    updated.unpaid_commission = referrer
        .unpaid_commission
        .checked_add(calc.amount)
        .ok_or_else(|| {
            LedgerError::InvalidOrder(format!(
                "order {} overflows unpaid commission of {}",
                order.order_id, referrer.referrer_id
            ))
        })?;
    store.update_referrer_balances(&updated, referrer.version)?;
    updated.version += 1;

    let audit = audit::record(
        store,
        &referrer.referrer_id,
        AuditAction::CommissionEarned,
        format!("{} at {} bps", calc.tier, calc.rate_bps),
        (Some(&order.order_id), Some(&event.event_id)),
        before,
        updated.balances(),
        now,
    )?;

    store.insert_order(&OrderRecord::from_finalized(
        order,
        Some(&referrer.referrer_id),
        OrderOutcome::Commissioned,
        None,
        Some(&event.event_id),
    ))?;
    if !link.locked {
        store.lock_attribution(&link.customer_id)?;
    }

    let mut notifications = vec![store.enqueue_notification(
        &ReferrerNotification::CommissionEarned {
            referrer_id: referrer.referrer_id.clone(),
            order_id: order.order_id.clone(),
            event_id: event.event_id.clone(),
            amount: calc.amount,
            tier: calc.tier.clone(),
            period: period.key(),
        },
        Some(&period.key()),
        now,
    )?];

    let progress = notifier::check_progress(
        store,
        policy,
        &referrer.referrer_id,
        calc.new_month_to_date_revenue,
        &period,
    )?;
    if progress.should_notify {
        if let (Some(next_tier), Some(remaining_amount)) =
            (progress.next_tier.clone(), progress.remaining_amount)
        {
            notifications.push(store.enqueue_notification(
                &ReferrerNotification::TierProgress {
                    referrer_id: referrer.referrer_id.clone(),
                    period: period.key(),
                    current_tier: progress.current_tier.clone(),
                    next_tier,
                    remaining_amount,
                    progress: progress.progress,
                },
                Some(&period.key()),
                now,
            )?);
        }
    }

    log::info!(
        "Commission {} on order {} for {}: {} ({}, {} bps)",
        event.event_id,
        order.order_id,
        referrer.referrer_id,
        calc.amount,
        calc.tier,
        calc.rate_bps
    );

    Ok(ApplyOutcome::Applied(Box::new(AppliedCommission {
        event,
        referrer: updated,
        audit,
        progress,
        notifications,
    })))
}
