//! Outbound notification requests.
//!
//! The engine decides THAT and WHAT to notify; delivery belongs to a
//! `NotificationSink`. Requests are written to the outbox table in the same
//! transaction as the ledger write, then handed to the sink after commit.
//! A failing sink is logged and never rolls back the ledger.

use crate::types::{Money, ParseEnumError, ReferrerId};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, sync::Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CommissionEarned,
    CommissionReversed,
    TierProgress,
    FraudAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommissionEarned => "commission_earned",
            Self::CommissionReversed => "commission_reversed",
            Self::TierProgress => "tier_progress",
            Self::FraudAlert => "fraud_alert",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commission_earned" => Ok(Self::CommissionEarned),
            "commission_reversed" => Ok(Self::CommissionReversed),
            "tier_progress" => Ok(Self::TierProgress),
            "fraud_alert" => Ok(Self::FraudAlert),
            other => Err(ParseEnumError::new("notification kind", other)),
        }
    }
}

/// `NotifyReferrer(referrerId, kind, payload)`.
/// Variants are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferrerNotification {
    CommissionEarned {
        referrer_id: ReferrerId,
        order_id: String,
        event_id: String,
        amount: Money,
        tier: String,
        period: String,
    },
    CommissionReversed {
        referrer_id: ReferrerId,
        order_id: String,
        event_id: String,
        amount: Money,
        reason: String,
    },
    TierProgress {
        referrer_id: ReferrerId,
        period: String,
        current_tier: String,
        next_tier: String,
        remaining_amount: Money,
        progress: f64,
    },
    FraudAlert {
        referrer_id: ReferrerId,
        score: f64,
        rules: Vec<String>,
    },
}

impl ReferrerNotification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::CommissionEarned { .. } => NotificationKind::CommissionEarned,
            Self::CommissionReversed { .. } => NotificationKind::CommissionReversed,
            Self::TierProgress { .. } => NotificationKind::TierProgress,
            Self::FraudAlert { .. } => NotificationKind::FraudAlert,
        }
    }

    pub fn referrer_id(&self) -> &str {
        match self {
            Self::CommissionEarned { referrer_id, .. }
            | Self::CommissionReversed { referrer_id, .. }
            | Self::TierProgress { referrer_id, .. }
            | Self::FraudAlert { referrer_id, .. } => referrer_id,
        }
    }
}

/// A request written to the outbox, paired with its row id.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedNotification {
    pub notification_id: i64,
    pub notification: ReferrerNotification,
}

/// Fire-and-forget delivery.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &ReferrerNotification) -> anyhow::Result<()>;
}

/// Writes every request to the log. Used by the runner.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: &ReferrerNotification) -> anyhow::Result<()> {
        log::info!(
            "NotifyReferrer {} {}: {}",
            notification.referrer_id(),
            notification.kind().as_str(),
            serde_json::to_string(notification)?
        );
        Ok(())
    }
}

/// Keeps every delivered request in memory. Used in tests and tooling.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<ReferrerNotification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<ReferrerNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, kind: NotificationKind) -> usize {
        self.sent().iter().filter(|n| n.kind() == kind).count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &ReferrerNotification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}
