//! Referrer records: enrollment, approval, and the balance fields every
//! ledger write mutates.
//!
//! Referrers are never hard-deleted. Status only moves forward through
//! `pending_approval -> active -> fraud_suspect`; suspension and clearing a
//! fraud flag are administrative actions outside this crate.

use crate::{
    audit::BalanceSnapshot,
    config::PolicyConfig,
    error::{LedgerError, LedgerResult},
    store::LedgerStore,
    types::{Money, ParseEnumError, Period, ReferrerId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const CODE_LEN: usize = 8;
const CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerStatus {
    PendingApproval,
    Active,
    Suspended,
    FraudSuspect,
}

impl ReferrerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::FraudSuspect => "fraud_suspect",
        }
    }

    /// Fraud suspicion is an alert, not a suspension: suspects keep earning.
    pub fn earns_commission(&self) -> bool {
        matches!(self, Self::Active | Self::FraudSuspect)
    }
}

impl fmt::Display for ReferrerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferrerStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(Self::PendingApproval),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "fraud_suspect" => Ok(Self::FraudSuspect),
            other => Err(ParseEnumError::new("referrer status", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactIdentity {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referrer {
    pub referrer_id: ReferrerId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub referral_code: String,
    pub status: ReferrerStatus,
    pub lifetime_revenue: Money,
    pub current_month_revenue: Money,
    /// Period that `current_month_revenue` belongs to.
    pub revenue_period: Option<String>,
    pub unpaid_commission: Money,
    pub paid_commission: Money,
    /// Reversed commission that exceeded the unpaid balance, awaiting review.
    pub clawback_due: Money,
    pub fraud_score: f64,
    pub referred_customers: i64,
    /// Optimistic-concurrency etag; bumped on every balance write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Referrer {
    /// True when `period` is the tracked month or a later one. An order
    /// delivered late for an earlier month leaves the running counter alone.
    pub fn advances_revenue_period(&self, period: &Period) -> bool {
        self.revenue_period
            .as_deref()
            .and_then(Period::parse)
            .map_or(true, |tracked| *period >= tracked)
    }

    pub fn balances(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            unpaid: self.unpaid_commission,
            paid: self.paid_commission,
            clawback_due: self.clawback_due,
        }
    }

    pub fn owns_email(&self, email: &str) -> bool {
        normalize_email(&self.email) == normalize_email(email)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// A fresh referral code: 8 uppercase hex characters from a v4 UUID.
pub fn issue_code() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .to_ascii_uppercase()
        .chars()
        .take(CODE_LEN)
        .collect()
}

/// Enroll a new program member. Runs inside the caller's transaction.
pub fn enroll(
    store: &LedgerStore,
    policy: &PolicyConfig,
    contact: &ContactIdentity,
    now: DateTime<Utc>,
) -> LedgerResult<Referrer> {
    if contact.email.trim().is_empty() {
        return Err(LedgerError::InvalidOrder("referrer email is required".into()));
    }

    let mut referral_code = None;
    for _ in 0..CODE_ATTEMPTS {
        let candidate = issue_code();
        if !store.referral_code_exists(&candidate)? {
            referral_code = Some(candidate);
            break;
        }
    }
    let referral_code = referral_code
        .ok_or_else(|| anyhow::anyhow!("could not issue a unique referral code"))?;

    let status = if policy.require_approval {
        ReferrerStatus::PendingApproval
    } else {
        ReferrerStatus::Active
    };

    let referrer = Referrer {
        referrer_id: format!("ref-{}", uuid::Uuid::new_v4().simple()),
        name: contact.name.clone(),
        email: normalize_email(&contact.email),
        phone: contact.phone.clone(),
        referral_code,
        status,
        lifetime_revenue: 0,
        current_month_revenue: 0,
        revenue_period: None,
        unpaid_commission: 0,
        paid_commission: 0,
        clawback_due: 0,
        fraud_score: 0.0,
        referred_customers: 0,
        version: 0,
        created_at: now,
    };
    store.insert_referrer(&referrer)?;
    log::info!(
        "Referrer {} enrolled with code {} ({})",
        referrer.referrer_id,
        referrer.referral_code,
        referrer.status
    );
    Ok(referrer)
}

/// `pending_approval -> active`.
pub fn approve(store: &LedgerStore, referrer_id: &str) -> LedgerResult<Referrer> {
    let mut referrer = store.require_referrer(referrer_id)?;
    if referrer.status != ReferrerStatus::PendingApproval {
        return Err(LedgerError::UnexpectedStatus {
            referrer_id: referrer_id.to_string(),
            status: referrer.status.to_string(),
            expected: ReferrerStatus::PendingApproval.to_string(),
        });
    }
    store.set_referrer_status(referrer_id, ReferrerStatus::Active)?;
    referrer.status = ReferrerStatus::Active;
    Ok(referrer)
}
