//! Audit trail: one append-only row per balance-affecting action.
//!
//! RULE: an audit entry is written in the SAME transaction as the balance
//! change it describes. The table rejects UPDATE and DELETE.

use crate::{
    error::LedgerResult,
    store::LedgerStore,
    types::{Money, ParseEnumError},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Actor recorded for writes made by the engine itself.
pub const ENGINE_ACTOR: &str = "ledger-engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub unpaid: Money,
    pub paid: Money,
    pub clawback_due: Money,
}

impl BalanceSnapshot {
    /// `unpaid + paid - clawback_due`, the figure reconciled against the ledger.
    pub fn net(&self) -> Money {
        self.unpaid + self.paid - self.clawback_due
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CommissionEarned,
    CommissionReversed,
    PayoutRecorded,
    FraudFlagged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommissionEarned => "commission_earned",
            Self::CommissionReversed => "commission_reversed",
            Self::PayoutRecorded => "payout_recorded",
            Self::FraudFlagged => "fraud_flagged",
        }
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commission_earned" => Ok(Self::CommissionEarned),
            "commission_reversed" => Ok(Self::CommissionReversed),
            "payout_recorded" => Ok(Self::PayoutRecorded),
            "fraud_flagged" => Ok(Self::FraudFlagged),
            other => Err(ParseEnumError::new("audit action", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Option<i64>,
    pub referrer_id: String,
    pub action: AuditAction,
    pub actor: String,
    pub reason: String,
    pub order_id: Option<String>,
    pub event_id: Option<String>,
    pub before: BalanceSnapshot,
    pub after: BalanceSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Append an entry written by the engine. Returns the entry with its id.
pub fn record(
    store: &LedgerStore,
    referrer_id: &str,
    action: AuditAction,
    reason: impl Into<String>,
    refs: (Option<&str>, Option<&str>),
    before: BalanceSnapshot,
    after: BalanceSnapshot,
    now: DateTime<Utc>,
) -> LedgerResult<AuditEntry> {
    let (order_id, event_id) = refs;
    let mut entry = AuditEntry {
        audit_id: None,
        referrer_id: referrer_id.to_string(),
        action,
        actor: ENGINE_ACTOR.to_string(),
        reason: reason.into(),
        order_id: order_id.map(str::to_string),
        event_id: event_id.map(str::to_string),
        before,
        after,
        created_at: now,
    };
    entry.audit_id = Some(store.insert_audit_entry(&entry)?);
    Ok(entry)
}
