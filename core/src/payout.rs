//! Payout recording. Moves unpaid commission to paid on the policy's
//! payout day. Bookkeeping only; no money is transferred here.

use crate::{
    audit::{self, AuditAction, AuditEntry},
    config::PolicyConfig,
    error::LedgerResult,
    referrer::ReferrerStatus,
    store::LedgerStore,
    types::{Money, ReferrerId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub referrer_id: ReferrerId,
    pub amount: Money,
    pub events_marked_paid: usize,
    pub audit_id: Option<i64>,
}

/// Record payouts for every eligible referrer. Returns nothing off-cycle.
///
/// Suspended referrers and fraud suspects are held until reviewed.
pub fn record_payouts(
    store: &LedgerStore,
    policy: &PolicyConfig,
    as_of: DateTime<Utc>,
) -> LedgerResult<Vec<PayoutRecord>> {
    if !policy.payout.is_payout_day(as_of.date_naive()) {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for referrer in store.all_referrers()? {
        if referrer.status != ReferrerStatus::Active {
            continue;
        }
        let amount = referrer.unpaid_commission;
        if amount <= 0 || amount < policy.payout.minimum_amount {
            continue;
        }

        let before = referrer.balances();
        let mut updated = referrer.clone();
        updated.paid_commission += amount;
        updated.unpaid_commission = 0;
        store.update_referrer_balances(&updated, referrer.version)?;
        let marked = store.mark_events_paid(&referrer.referrer_id)?;

        let entry: AuditEntry = audit::record(
            store,
            &referrer.referrer_id,
            AuditAction::PayoutRecorded,
            format!("payout cycle {:?}", policy.payout.cycle),
            (None, None),
            before,
            updated.balances(),
            as_of,
        )?;
        log::info!("Payout of {amount} recorded for {}", referrer.referrer_id);

        records.push(PayoutRecord {
            referrer_id: referrer.referrer_id,
            amount,
            events_marked_paid: marked,
            audit_id: entry.audit_id,
        });
    }
    Ok(records)
}
