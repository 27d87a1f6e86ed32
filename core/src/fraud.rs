//! Fraud signal evaluator.
//!
//! Each rule adds its weight to the score when its signal is beyond the
//! configured threshold:
//!   1. referred accounts sharing one shipping address
//!   2. referred accounts sharing one phone number
//!   3. COD orders returned or cancelled (not collected)
//!   4. share of monthly revenue landing in the last N days of the period
//!
//! `active -> fraud_suspect` is a one-way alert. It never suspends the
//! account; clearing it is an administrative action.

use crate::{
    audit::{self, AuditAction},
    config::{FraudThresholds, PolicyConfig},
    error::LedgerResult,
    notification::{QueuedNotification, ReferrerNotification},
    referrer::ReferrerStatus,
    store::LedgerStore,
    types::Period,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FraudSignals {
    pub shared_address_accounts: u32,
    pub shared_phone_accounts: u32,
    pub uncollected_cod_orders: u32,
    pub end_of_period_revenue_share: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudRule {
    SharedAddress,
    SharedPhone,
    UncollectedCod,
    EndOfPeriodSpike,
}

impl FraudRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharedAddress => "shared_address",
            Self::SharedPhone => "shared_phone",
            Self::UncollectedCod => "uncollected_cod",
            Self::EndOfPeriodSpike => "end_of_period_spike",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAssessment {
    pub referrer_id: String,
    pub signals: FraudSignals,
    pub score: f64,
    pub triggered: Vec<FraudRule>,
    pub is_suspect: bool,
    /// True only on the evaluation that moved the referrer to `fraud_suspect`.
    pub newly_flagged: bool,
}

/// Additive score. Pure.
pub fn score(signals: &FraudSignals, t: &FraudThresholds) -> (f64, Vec<FraudRule>) {
    let mut total = 0.0;
    let mut triggered = Vec::new();

    if signals.shared_address_accounts > t.shared_address_max {
        total += t.shared_address_weight;
        triggered.push(FraudRule::SharedAddress);
    }
    if signals.shared_phone_accounts > t.shared_phone_max {
        total += t.shared_phone_weight;
        triggered.push(FraudRule::SharedPhone);
    }
    if signals.uncollected_cod_orders > t.cod_uncollected_max {
        total += t.cod_uncollected_weight;
        triggered.push(FraudRule::UncollectedCod);
    }
    if signals.end_of_period_revenue_share > t.end_of_period_share_max {
        total += t.end_of_period_weight;
        triggered.push(FraudRule::EndOfPeriodSpike);
    }

    (total, triggered)
}

/// Derive signals for `referrer_id` from recorded orders.
pub fn collect_signals(
    store: &LedgerStore,
    thresholds: &FraudThresholds,
    referrer_id: &str,
    period: &Period,
) -> LedgerResult<FraudSignals> {
    let (period_total, late_total) = store.period_revenue_split(
        referrer_id,
        &period.key(),
        period.final_days_cutoff(thresholds.end_of_period_days),
    )?;
    let end_of_period_revenue_share = if period_total > 0 {
        late_total as f64 / period_total as f64
    } else {
        0.0
    };

    Ok(FraudSignals {
        shared_address_accounts: store.max_customers_sharing_address(referrer_id)?,
        shared_phone_accounts: store.max_customers_sharing_phone(referrer_id)?,
        uncollected_cod_orders: store.uncollected_cod_orders(referrer_id)?,
        end_of_period_revenue_share,
    })
}

/// `evaluate(referrer, signals) -> (fraudScore, isSuspect)`.
///
/// Persists the score. Flags the referrer, writes an audit entry and queues
/// a `fraud_alert` the first time the threshold is crossed.
pub fn evaluate(
    store: &LedgerStore,
    policy: &PolicyConfig,
    referrer_id: &str,
    signals: FraudSignals,
    now: DateTime<Utc>,
) -> LedgerResult<(FraudAssessment, Option<QueuedNotification>)> {
    let referrer = store.require_referrer(referrer_id)?;
    let (total, triggered) = score(&signals, &policy.fraud);
    let is_suspect = total >= policy.fraud.suspect_score;

    store.set_fraud_score(referrer_id, total)?;

    let can_flag = matches!(
        referrer.status,
        ReferrerStatus::Active | ReferrerStatus::PendingApproval
    );
    let mut alert = None;
    if is_suspect && can_flag {
        store.set_referrer_status(referrer_id, ReferrerStatus::FraudSuspect)?;
        let rules: Vec<String> = triggered.iter().map(|r| r.as_str().to_string()).collect();
        audit::record(
            store,
            referrer_id,
            AuditAction::FraudFlagged,
            format!("score {total:.2}: {}", rules.join(",")),
            (None, None),
            referrer.balances(),
            referrer.balances(),
            now,
        )?;
        alert = Some(store.enqueue_notification(
            &ReferrerNotification::FraudAlert {
                referrer_id: referrer_id.to_string(),
                score: total,
                rules,
            },
            Some(&Period::of(now).key()),
            now,
        )?);
        log::warn!("Referrer {referrer_id} flagged as fraud suspect (score {total:.2})");
    }

    Ok((
        FraudAssessment {
            referrer_id: referrer_id.to_string(),
            signals,
            score: total,
            triggered,
            is_suspect,
            newly_flagged: alert.is_some(),
        },
        alert,
    ))
}
