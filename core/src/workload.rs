//! Deterministic synthetic workload.
//!
//! `Workload::generate(config, seed)` produces a time-ordered list of
//! inbound signals: enrollments, finalized orders (some redelivered),
//! reversals (some arriving before their order) and payout runs. The same
//! seed always yields the same list. `drive` feeds it through an engine.
//!
//! Referral codes are only known after enrollment, so orders name their
//! referrer by enrollment index and `drive` substitutes the issued code.

use crate::{
    engine::{FinalizeOutcome, LedgerEngine},
    error::{LedgerError, LedgerResult},
    ledger::ReversalReason,
    order::{CustomerIdentity, FinalizedOrder, PaymentMethod},
    referrer::{ContactIdentity, ReferrerStatus},
    reversal::ReversalOutcome,
    rng::{SeededRng, StreamSlot},
    types::Money,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub referrers: usize,
    pub customers: usize,
    pub orders: usize,
    pub start: DateTime<Utc>,
    pub days: u32,
    /// Smallest order amount in minor units; sizes are Pareto-distributed above it.
    pub min_order_amount: Money,
    pub max_order_amount: Money,
    /// Share of customers that arrive with a referral code.
    pub referred_share: f64,
    pub cod_rate: f64,
    pub redelivery_rate: f64,
    pub reversal_rate: f64,
    /// Share of reversals delivered before their order.
    pub early_reversal_rate: f64,
    /// Share of referred customers who try their referrer's own email.
    pub self_referral_rate: f64,
    pub invalid_code_rate: f64,
    /// Share of customers drawn from a small pool of shared addresses and phones.
    pub shared_identity_rate: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            referrers: 8,
            customers: 120,
            orders: 400,
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            days: 62,
            min_order_amount: 50_000,
            max_order_amount: 20_000_000,
            referred_share: 0.7,
            cod_rate: 0.25,
            redelivery_rate: 0.1,
            reversal_rate: 0.12,
            early_reversal_rate: 0.2,
            self_referral_rate: 0.02,
            invalid_code_rate: 0.02,
            shared_identity_rate: 0.1,
        }
    }
}

/// How an order names the code its customer used at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeUse {
    None,
    Referrer(usize),
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Enroll {
        contact: ContactIdentity,
        at: DateTime<Utc>,
    },
    OrderFinalized {
        order: FinalizedOrder,
        code: CodeUse,
    },
    OrderReversed {
        order_id: String,
        reason: ReversalReason,
        at: DateTime<Utc>,
    },
    PayoutRun {
        at: DateTime<Utc>,
    },
}

impl Signal {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Enroll { at, .. } | Self::OrderReversed { at, .. } | Self::PayoutRun { at } => *at,
            Self::OrderFinalized { order, .. } => order.finalized_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub seed: u64,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone)]
struct Customer {
    identity: CustomerIdentity,
    address: String,
    code: CodeUse,
}

impl Workload {
    pub fn generate(config: &WorkloadConfig, seed: u64) -> Self {
        let mut referrer_rng = SeededRng::new(seed, StreamSlot::Referrers);
        let mut customer_rng = SeededRng::new(seed, StreamSlot::Customers);
        let mut order_rng = SeededRng::new(seed, StreamSlot::Orders);
        let mut reversal_rng = SeededRng::new(seed, StreamSlot::Reversals);

        // Enrollments land before the first order.
        let enroll_at = config.start - Duration::hours(1);
        let contacts: Vec<ContactIdentity> = (0..config.referrers)
            .map(|i| ContactIdentity {
                name: format!("Referrer {i}"),
                email: format!("referrer{i}@example.test"),
                phone: Some(format!("+1555{:07}", referrer_rng.next_u64_below(10_000_000))),
            })
            .collect();

        let shared_addresses: Vec<String> = (0..3).map(|i| format!("{} Ring Road", 100 + i)).collect();
        let shared_phones: Vec<String> = (0..3).map(|i| format!("+1555000{i:04}")).collect();

        let customers: Vec<Customer> = (0..config.customers)
            .map(|i| {
                let shared = customer_rng.chance(config.shared_identity_rate);
                let address = if shared {
                    customer_rng.pick(&shared_addresses).cloned()
                } else {
                    None
                }
                .unwrap_or_else(|| format!("{} Elm Street, Apt {i}", customer_rng.range_i64(1, 999)));
                let phone = if shared {
                    customer_rng.pick(&shared_phones).cloned()
                } else {
                    None
                }
                .unwrap_or_else(|| format!("+1666{i:07}"));

                let referred = config.referrers > 0 && customer_rng.chance(config.referred_share);
                let code = if !referred {
                    CodeUse::None
                } else if customer_rng.chance(config.invalid_code_rate) {
                    CodeUse::Invalid
                } else {
                    CodeUse::Referrer(customer_rng.next_u64_below(config.referrers as u64) as usize)
                };
                let email = match code {
                    CodeUse::Referrer(r) if customer_rng.chance(config.self_referral_rate) => {
                        contacts[r].email.clone()
                    }
                    _ => format!("customer{i}@example.test"),
                };
                Customer {
                    identity: CustomerIdentity {
                        customer_id: format!("cust-{i:05}"),
                        email,
                        phone: Some(phone),
                    },
                    address,
                    code,
                }
            })
            .collect();

        let mut signals: Vec<Signal> = contacts
            .into_iter()
            .map(|contact| Signal::Enroll {
                contact,
                at: enroll_at,
            })
            .collect();

        let span_secs = (config.days.max(1) as i64) * 86_400;
        for n in 0..config.orders {
            let Some(customer) = order_rng.pick(&customers).cloned() else {
                break;
            };
            let finalized_at = config.start + Duration::seconds(order_rng.range_i64(0, span_secs - 1));
            let amount = (order_rng.pareto(config.min_order_amount as f64, 1.6) as Money)
                .min(config.max_order_amount);
            let order = FinalizedOrder {
                order_id: format!("ord-{n:06}"),
                amount,
                customer: customer.identity.clone(),
                referral_code: None,
                finalized_at,
                payment_method: if order_rng.chance(config.cod_rate) {
                    PaymentMethod::Cod
                } else {
                    PaymentMethod::Prepaid
                },
                shipping_address: Some(customer.address.clone()),
            };

            if reversal_rng.chance(config.reversal_rate) {
                let reason = match reversal_rng.next_u64_below(10) {
                    0..=5 => ReversalReason::OrderReturned,
                    6..=8 => ReversalReason::OrderCancelled,
                    _ => ReversalReason::FraudDetected,
                };
                let offset = Duration::hours(reversal_rng.range_i64(1, 24 * 14));
                let at = if reversal_rng.chance(config.early_reversal_rate) {
                    finalized_at - Duration::minutes(reversal_rng.range_i64(1, 30))
                } else {
                    finalized_at + offset
                };
                signals.push(Signal::OrderReversed {
                    order_id: order.order_id.clone(),
                    reason,
                    at,
                });
            }
            if order_rng.chance(config.redelivery_rate) {
                signals.push(Signal::OrderFinalized {
                    order: order.clone(),
                    code: customer.code,
                });
            }
            signals.push(Signal::OrderFinalized {
                order,
                code: customer.code,
            });
        }

        for day in 0..config.days {
            let at = config.start + Duration::days(day as i64) + Duration::hours(23);
            signals.push(Signal::PayoutRun { at });
        }

        // Stable: equal timestamps keep generation order.
        signals.sort_by_key(Signal::at);
        Self { seed, signals }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub referrers: usize,
    pub orders_seen: usize,
    pub commissioned: usize,
    pub already_processed: usize,
    pub no_commission: usize,
    pub outside_window: usize,
    pub no_referral: usize,
    pub invalid_codes: usize,
    pub self_referrals: usize,
    pub reversed: usize,
    pub already_reversed: usize,
    pub deferred: usize,
    pub noop_reversals: usize,
    pub payouts: usize,
    pub paid_out: Money,
}

/// Feed every signal through `engine`, in order.
///
/// Hard attribution errors are counted, not propagated: the order flow
/// never fails an order because its referral was rejected.
pub fn drive(engine: &LedgerEngine, workload: &Workload) -> LedgerResult<WorkloadSummary> {
    let mut summary = WorkloadSummary::default();
    let mut codes: Vec<String> = Vec::new();

    for signal in &workload.signals {
        match signal {
            Signal::Enroll { contact, at } => {
                let mut referrer = engine.enroll(contact, *at)?;
                if referrer.status == ReferrerStatus::PendingApproval {
                    referrer = engine.approve(&referrer.referrer_id)?;
                }
                codes.push(referrer.referral_code);
                summary.referrers += 1;
            }
            Signal::OrderFinalized { order, code } => {
                let mut order = order.clone();
                order.referral_code = match code {
                    CodeUse::None => None,
                    CodeUse::Invalid => Some("NOTACODE".to_string()),
                    CodeUse::Referrer(i) => codes.get(*i).cloned(),
                };
                summary.orders_seen += 1;
                match engine.on_order_finalized(&order) {
                    Ok(FinalizeOutcome::Commissioned { .. }) => summary.commissioned += 1,
                    Ok(FinalizeOutcome::AlreadyProcessed { .. }) => summary.already_processed += 1,
                    Ok(FinalizeOutcome::NoCommission { .. }) => summary.no_commission += 1,
                    Ok(FinalizeOutcome::OutsideValidityWindow { .. }) => summary.outside_window += 1,
                    Ok(FinalizeOutcome::NoReferral) => summary.no_referral += 1,
                    Err(LedgerError::InvalidCode { code }) => {
                        log::debug!("Order {} used unknown code {code}", order.order_id);
                        summary.invalid_codes += 1;
                    }
                    Err(LedgerError::SelfReferral { customer_id }) => {
                        log::debug!("Order {} is a self-referral by {customer_id}", order.order_id);
                        summary.self_referrals += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            Signal::OrderReversed {
                order_id,
                reason,
                at,
            } => match engine.on_order_reversed(order_id, *reason, *at)? {
                ReversalOutcome::Reversed(_) => summary.reversed += 1,
                ReversalOutcome::AlreadyReversed(_) => summary.already_reversed += 1,
                ReversalOutcome::Deferred => summary.deferred += 1,
                ReversalOutcome::NoOp => summary.noop_reversals += 1,
            },
            Signal::PayoutRun { at } => {
                for payout in engine.record_payouts(*at)? {
                    summary.payouts += 1;
                    summary.paid_out += payout.amount;
                }
            }
        }
    }

    log::info!(
        "Workload seed {} driven: {} orders, {} commissioned, {} reversed",
        workload.seed,
        summary.orders_seen,
        summary.commissioned,
        summary.reversed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_signals() {
        let config = WorkloadConfig::default();
        assert_eq!(Workload::generate(&config, 9), Workload::generate(&config, 9));
        assert_ne!(Workload::generate(&config, 9), Workload::generate(&config, 10));
    }

    #[test]
    fn signals_are_time_ordered_with_enrollments_first() {
        let w = Workload::generate(&WorkloadConfig::default(), 3);
        assert!(w.signals.windows(2).all(|p| p[0].at() <= p[1].at()));
        assert!(matches!(w.signals[0], Signal::Enroll { .. }));
    }
}
