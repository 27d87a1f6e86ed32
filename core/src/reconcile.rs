//! Balance reconciliation.
//!
//! For every referrer:
//!   unpaid + paid - clawback_due == Σ amount of non-reversed earned events
//! and the latest audit entry's after-balance must equal the stored balance.
//! Without reviewed clawbacks this is exactly `unpaid + paid == Σ`.

use crate::{
    audit::BalanceSnapshot,
    error::LedgerResult,
    store::LedgerStore,
    types::{Money, ReferrerId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub referrer_id: ReferrerId,
    pub balances: BalanceSnapshot,
    pub ledger_total: Money,
    pub audit_after: Option<BalanceSnapshot>,
}

impl ReconciliationReport {
    pub fn delta(&self) -> Money {
        self.balances.net() - self.ledger_total
    }

    pub fn ledger_balanced(&self) -> bool {
        self.delta() == 0
    }

    /// No audit entry is fine only while the balance is untouched.
    pub fn audit_consistent(&self) -> bool {
        match self.audit_after {
            Some(after) => after == self.balances,
            None => self.balances == BalanceSnapshot::default(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.ledger_balanced() && self.audit_consistent()
    }
}

pub fn reconcile_referrer(store: &LedgerStore, referrer_id: &str) -> LedgerResult<ReconciliationReport> {
    let referrer = store.require_referrer(referrer_id)?;
    let report = ReconciliationReport {
        referrer_id: referrer.referrer_id.clone(),
        balances: referrer.balances(),
        ledger_total: store.sum_active_earned(referrer_id)?,
        audit_after: store.latest_audit_entry(referrer_id)?.map(|e| e.after),
    };
    if !report.is_clean() {
        log::error!(
            "Reconciliation mismatch for {}: balances {:?}, ledger {}, audit {:?}",
            report.referrer_id,
            report.balances,
            report.ledger_total,
            report.audit_after
        );
    }
    Ok(report)
}

pub fn reconcile_all(store: &LedgerStore) -> LedgerResult<Vec<ReconciliationReport>> {
    store
        .referrer_ids()?
        .iter()
        .map(|id| reconcile_referrer(store, id))
        .collect()
}
