//! The ledger engine, the entry point for every inbound signal.
//!
//! OPERATION SHAPE (fixed for every balance-affecting call):
//!   1. take ONE policy snapshot
//!   2. run the whole read-modify-write inside `store.atomically()`,
//!      retried on version conflicts or a busy database
//!   3. after commit, hand queued notifications to the sink
//!
//! RULES:
//!   - Notification delivery happens only after commit and never rolls back.
//!   - The processed-order marker is checked and written inside the same
//!     transaction as the balance change.
//!   - A reversal never applies before its commission. Early reversals are
//!     parked and drained right after the order is processed.

use crate::{
    attribution::{self, Attribution},
    config::PolicyConfig,
    error::{LedgerError, LedgerResult},
    fraud::{self, FraudAssessment, FraudSignals},
    ledger::{self, ApplyOutcome, LedgerEvent, ReversalReason},
    notification::{NotificationSink, QueuedNotification, RecordingSink},
    notifier::TierProgress,
    order::{CustomerIdentity, FinalizedOrder, OrderOutcome, OrderRecord},
    payout::{self, PayoutRecord},
    policy::PolicyStore,
    reconcile::{self, ReconciliationReport},
    referrer::{self, ContactIdentity, Referrer},
    retry::RetryPolicy,
    reversal::{self, ReversalOutcome},
    store::LedgerStore,
    types::{Period, ReferrerId},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of `on_order_finalized`. Every variant is a normal result.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Commissioned {
        event: LedgerEvent,
        progress: TierProgress,
    },
    /// Redelivery. Carries the outcome recorded the first time.
    AlreadyProcessed {
        outcome: OrderOutcome,
        event: Option<LedgerEvent>,
    },
    /// Attributed, but finalized after `referral_validity_days`.
    OutsideValidityWindow { referrer_id: ReferrerId },
    /// Attributed to a referrer whose status earns nothing.
    NoCommission {
        referrer_id: ReferrerId,
        reason: String,
    },
    NoReferral,
}

impl FinalizeOutcome {
    pub fn event(&self) -> Option<&LedgerEvent> {
        match self {
            Self::Commissioned { event, .. } => Some(event),
            Self::AlreadyProcessed { event, .. } => event.as_ref(),
            _ => None,
        }
    }
}

/// Work done inside the finalize transaction, handed out after commit.
struct Finalized {
    outcome: FinalizeOutcome,
    referrer_id: Option<ReferrerId>,
    notifications: Vec<QueuedNotification>,
}

pub struct LedgerEngine {
    pub store: LedgerStore,
    policy: Arc<PolicyStore>,
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
}

impl LedgerEngine {
    pub fn new(store: LedgerStore, policy: Arc<PolicyStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            policy,
            sink,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// In-memory, migrated engine on `PolicyConfig::default_test()`.
    /// Returns the recording sink so tests can inspect deliveries.
    pub fn build_test() -> LedgerResult<(Self, Arc<RecordingSink>)> {
        Self::build_test_with(PolicyConfig::default_test())
    }

    pub fn build_test_with(config: PolicyConfig) -> LedgerResult<(Self, Arc<RecordingSink>)> {
        let store = LedgerStore::in_memory()?;
        store.migrate()?;
        let policy = Arc::new(PolicyStore::with_config(config)?);
        let sink = Arc::new(RecordingSink::new());
        let engine = Self::new(store, policy, sink.clone());
        Ok((engine, sink))
    }

    /// A second engine on its own connection to the same database, sharing
    /// this engine's policy store and sink.
    pub fn connect(&self) -> LedgerResult<Self> {
        Ok(Self {
            store: self.store.reopen()?,
            policy: Arc::clone(&self.policy),
            sink: Arc::clone(&self.sink),
            retry: self.retry,
        })
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    // ── Referrers ─────────────────────────────────────────────────

    pub fn enroll(&self, contact: &ContactIdentity, now: DateTime<Utc>) -> LedgerResult<Referrer> {
        let snapshot = self.policy.snapshot()?;
        self.retry.run("enroll", || {
            self.store
                .atomically(|store| referrer::enroll(store, &snapshot.config, contact, now))
        })
    }

    pub fn approve(&self, referrer_id: &str) -> LedgerResult<Referrer> {
        self.retry.run("approve", || {
            self.store
                .atomically(|store| referrer::approve(store, referrer_id))
        })
    }

    pub fn referrer(&self, referrer_id: &str) -> LedgerResult<Option<Referrer>> {
        self.store.referrer(referrer_id)
    }

    /// Attribute a customer outside of checkout (e.g. at sign-up).
    pub fn resolve(
        &self,
        code: &str,
        customer: &CustomerIdentity,
        now: DateTime<Utc>,
    ) -> LedgerResult<Attribution> {
        let snapshot = self.policy.snapshot()?;
        self.retry.run("resolve", || {
            self.store.atomically(|store| {
                attribution::resolve(store, &snapshot.config, code, customer, now)
            })
        })
    }

    // ── Inbound order signals ─────────────────────────────────────

    /// `OnOrderFinalized`. Safe to deliver more than once.
    ///
    /// `InvalidCode`, `SelfReferral` and `PolicyUnavailable` are returned as
    /// errors and nothing is recorded, so the signal can be retried later.
    pub fn on_order_finalized(&self, order: &FinalizedOrder) -> LedgerResult<FinalizeOutcome> {
        validate_order(order)?;
        let snapshot = self.policy.snapshot()?;
        let policy = &snapshot.config;

        let finalized = self.retry.run("order finalized", || {
            self.store
                .atomically(|store| finalize_in_tx(store, policy, order))
        })?;
        self.dispatch(&finalized.notifications);

        // Also on redelivery: a crash between the two units leaves the parked row behind.
        self.drain_parked_reversal(order, policy)?;
        // The commission is already committed. A failed evaluation is logged and
        // re-run by redelivery or the next sweep.
        if let Some(referrer_id) = &finalized.referrer_id {
            if let Err(e) = self.evaluate_fraud_with(policy, referrer_id, None, order.finalized_at) {
                log::warn!(
                    "Fraud evaluation for {referrer_id} after order {} failed: {e}",
                    order.order_id
                );
            }
        }
        Ok(finalized.outcome)
    }

    /// `OnOrderReversed`. Safe to deliver more than once, and before the order.
    pub fn on_order_reversed(
        &self,
        order_id: &str,
        reason: ReversalReason,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReversalOutcome> {
        let snapshot = self.policy.snapshot()?;
        let policy = &snapshot.config;

        let outcome = self.retry.run("order reversed", || {
            self.store
                .atomically(|store| reversal::reverse(store, policy, order_id, reason, now))
        })?;

        if let ReversalOutcome::Reversed(reversed) = &outcome {
            self.dispatch(&reversed.notifications);
        }
        let referrer_id = self.store.order(order_id)?.and_then(|o| o.referrer_id);
        if let Some(referrer_id) = referrer_id {
            self.evaluate_fraud_with(policy, &referrer_id, None, now)?;
        }
        Ok(outcome)
    }

    fn drain_parked_reversal(&self, order: &FinalizedOrder, policy: &PolicyConfig) -> LedgerResult<()> {
        let order_id = order.order_id.as_str();
        let outcome = self.retry.run("parked reversal", || {
            self.store.atomically(|store| match store.take_parked_reversal(order_id)? {
                Some((reason, received_at)) => {
                    // The offset is dated no earlier than the commission it offsets.
                    let at = received_at.max(order.finalized_at);
                    reversal::reverse(store, policy, order_id, reason, at).map(Some)
                }
                None => Ok(None),
            })
        })?;
        match outcome {
            Some(ReversalOutcome::Reversed(reversed)) => {
                log::info!("Applied parked reversal for order {order_id}");
                self.dispatch(&reversed.notifications);
            }
            Some(other) => log::debug!("Parked reversal for {order_id} resolved as {other:?}"),
            None => {}
        }
        Ok(())
    }

    // ── Fraud ─────────────────────────────────────────────────────

    /// Evaluate one referrer. Signals are derived from the store when `None`.
    pub fn evaluate_fraud(
        &self,
        referrer_id: &str,
        signals: Option<FraudSignals>,
        now: DateTime<Utc>,
    ) -> LedgerResult<FraudAssessment> {
        let snapshot = self.policy.snapshot()?;
        self.evaluate_fraud_with(&snapshot.config, referrer_id, signals, now)
    }

    /// Scheduled pass over every referrer.
    pub fn fraud_sweep(&self, now: DateTime<Utc>) -> LedgerResult<Vec<FraudAssessment>> {
        let snapshot = self.policy.snapshot()?;
        self.store
            .referrer_ids()?
            .iter()
            .map(|id| self.evaluate_fraud_with(&snapshot.config, id, None, now))
            .collect()
    }

    fn evaluate_fraud_with(
        &self,
        policy: &PolicyConfig,
        referrer_id: &str,
        signals: Option<FraudSignals>,
        now: DateTime<Utc>,
    ) -> LedgerResult<FraudAssessment> {
        let (assessment, alert) = self.retry.run("fraud evaluation", || {
            self.store.atomically(|store| {
                let signals = match signals {
                    Some(s) => s,
                    None => fraud::collect_signals(store, &policy.fraud, referrer_id, &Period::of(now))?,
                };
                fraud::evaluate(store, policy, referrer_id, signals, now)
            })
        })?;
        if let Some(alert) = alert {
            self.dispatch(std::slice::from_ref(&alert));
        }
        Ok(assessment)
    }

    // ── Payouts and reconciliation ────────────────────────────────

    pub fn record_payouts(&self, as_of: DateTime<Utc>) -> LedgerResult<Vec<PayoutRecord>> {
        let snapshot = self.policy.snapshot()?;
        self.retry.run("payout", || {
            self.store
                .atomically(|store| payout::record_payouts(store, &snapshot.config, as_of))
        })
    }

    pub fn reconcile(&self, referrer_id: &str) -> LedgerResult<ReconciliationReport> {
        reconcile::reconcile_referrer(&self.store, referrer_id)
    }

    pub fn reconcile_all(&self) -> LedgerResult<Vec<ReconciliationReport>> {
        reconcile::reconcile_all(&self.store)
    }

    // ── Notification dispatch ─────────────────────────────────────

    /// Hand committed requests to the sink. Failures are logged and left
    /// undelivered in the outbox for `redeliver_pending`.
    fn dispatch(&self, notifications: &[QueuedNotification]) {
        for queued in notifications {
            match self.sink.notify(&queued.notification) {
                Ok(()) => {
                    if let Err(e) = self.store.mark_notification_delivered(queued.notification_id) {
                        log::warn!(
                            "Notification {} sent but not marked delivered: {e}",
                            queued.notification_id
                        );
                    }
                }
                Err(e) => log::warn!(
                    "Notification {} ({}) to {} failed: {e}",
                    queued.notification_id,
                    queued.notification.kind().as_str(),
                    queued.notification.referrer_id()
                ),
            }
        }
    }

    /// Retry delivery of every outbox row still marked undelivered.
    pub fn redeliver_pending(&self) -> LedgerResult<usize> {
        let pending = self.store.undelivered_notifications()?;
        self.dispatch(&pending);
        Ok(pending.len())
    }
}

fn validate_order(order: &FinalizedOrder) -> LedgerResult<()> {
    if order.order_id.trim().is_empty() {
        return Err(LedgerError::InvalidOrder("order id is empty".into()));
    }
    if order.customer.customer_id.trim().is_empty() {
        return Err(LedgerError::InvalidOrder(format!(
            "order {} has no customer id",
            order.order_id
        )));
    }
    if order.amount < 0 {
        return Err(LedgerError::InvalidOrder(format!(
            "order {} has negative amount {}",
            order.order_id, order.amount
        )));
    }
    Ok(())
}

/// Everything `on_order_finalized` writes, as one atomic unit.
fn finalize_in_tx(
    store: &LedgerStore,
    policy: &PolicyConfig,
    order: &FinalizedOrder,
) -> LedgerResult<Finalized> {
    if let Some(record) = store.order(&order.order_id)? {
        log::debug!("Order {} redelivered", order.order_id);
        let event = match &record.earned_event_id {
            Some(id) => store.ledger_event(id)?,
            None => None,
        };
        return Ok(Finalized {
            referrer_id: commissioned_referrer(&record),
            outcome: FinalizeOutcome::AlreadyProcessed {
                outcome: record.outcome,
                event,
            },
            notifications: Vec::new(),
        });
    }

    let customer = &order.customer;
    let code = order
        .referral_code
        .as_deref()
        .filter(|c| !c.trim().is_empty());
    let existing = store.attribution_for_customer(&customer.customer_id)?;

    // The resolver only runs until the customer's first commissioned order.
    let link = match existing {
        Some(link) if link.locked => Some(link),
        existing => match code {
            Some(code) if !store.customer_has_commissioned_order(&customer.customer_id)? => {
                Some(attribution::resolve(store, policy, code, customer, order.finalized_at)?.link)
            }
            _ => existing,
        },
    };

    let Some(link) = link else {
        store.insert_order(&OrderRecord::from_finalized(
            order,
            None,
            OrderOutcome::NoReferral,
            None,
            None,
        ))?;
        log::debug!("Order {} has no referral", order.order_id);
        return Ok(Finalized {
            outcome: FinalizeOutcome::NoReferral,
            referrer_id: None,
            notifications: Vec::new(),
        });
    };

    let referrer = store.require_referrer(&link.referrer_id)?;
    if !referrer.status.earns_commission() {
        let reason = format!("referrer is {}", referrer.status);
        record_no_commission(store, order, &referrer.referrer_id, &reason)?;
        return Ok(Finalized {
            outcome: FinalizeOutcome::NoCommission {
                referrer_id: referrer.referrer_id,
                reason,
            },
            referrer_id: None,
            notifications: Vec::new(),
        });
    }

    if !link.is_within_validity(order.finalized_at, policy.referral_validity_days) {
        record_no_commission(store, order, &referrer.referrer_id, "outside validity window")?;
        log::info!(
            "Order {} for {} is outside the referral validity window",
            order.order_id,
            referrer.referrer_id
        );
        return Ok(Finalized {
            outcome: FinalizeOutcome::OutsideValidityWindow {
                referrer_id: referrer.referrer_id,
            },
            referrer_id: None,
            notifications: Vec::new(),
        });
    }

    match ledger::apply_commission(store, policy, order, &referrer, &link)? {
        ApplyOutcome::Applied(applied) => Ok(Finalized {
            referrer_id: Some(applied.referrer.referrer_id.clone()),
            outcome: FinalizeOutcome::Commissioned {
                event: applied.event,
                progress: applied.progress,
            },
            notifications: applied.notifications,
        }),
        ApplyOutcome::AlreadyProcessed { record, event } => Ok(Finalized {
            referrer_id: commissioned_referrer(&record),
            outcome: FinalizeOutcome::AlreadyProcessed {
                outcome: record.outcome,
                event,
            },
            notifications: Vec::new(),
        }),
    }
}

/// Referrer whose fraud evaluation a redelivered order re-runs.
fn commissioned_referrer(record: &OrderRecord) -> Option<ReferrerId> {
    match record.outcome {
        OrderOutcome::Commissioned => record.referrer_id.clone(),
        _ => None,
    }
}

fn record_no_commission(
    store: &LedgerStore,
    order: &FinalizedOrder,
    referrer_id: &str,
    reason: &str,
) -> LedgerResult<()> {
    store.insert_order(&OrderRecord::from_finalized(
        order,
        Some(referrer_id),
        OrderOutcome::NoCommission,
        Some(reason),
        None,
    ))
}
