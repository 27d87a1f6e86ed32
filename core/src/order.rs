//! Inbound order signals and the per-order processed marker.

use crate::types::{CustomerId, Money, OrderId, ParseEnumError, ReferrerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub customer_id: CustomerId,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Prepaid,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepaid => "prepaid",
            Self::Cod => "cod",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepaid" => Ok(Self::Prepaid),
            "cod" => Ok(Self::Cod),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}

/// `OnOrderFinalized` as delivered by the checkout flow. May arrive more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedOrder {
    pub order_id: OrderId,
    pub amount: Money,
    pub customer: CustomerIdentity,
    #[serde(default)]
    pub referral_code: Option<String>,
    pub finalized_at: DateTime<Utc>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub shipping_address: Option<String>,
}

/// Outcome recorded by the processed marker the first time an order is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderOutcome {
    Commissioned,
    NoCommission,
    NoReferral,
}

impl OrderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commissioned => "commissioned",
            Self::NoCommission => "no_commission",
            Self::NoReferral => "no_referral",
        }
    }
}

impl FromStr for OrderOutcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commissioned" => Ok(Self::Commissioned),
            "no_commission" => Ok(Self::NoCommission),
            "no_referral" => Ok(Self::NoReferral),
            other => Err(ParseEnumError::new("order outcome", other)),
        }
    }
}

/// The persisted processed marker plus the order facts fraud rules read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub referrer_id: Option<ReferrerId>,
    pub amount: Money,
    pub outcome: OrderOutcome,
    pub note: Option<String>,
    pub earned_event_id: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_address: Option<String>,
    pub phone: Option<String>,
    pub period: String,
    pub finalized_day: u32,
    pub finalized_at: DateTime<Utc>,
    pub reversal_reason: Option<String>,
}

impl OrderRecord {
    /// Marker for `order` as first seen, with the outcome decided for it.
    pub fn from_finalized(
        order: &FinalizedOrder,
        referrer_id: Option<&str>,
        outcome: OrderOutcome,
        note: Option<&str>,
        earned_event_id: Option<&str>,
    ) -> Self {
        use chrono::Datelike;
        Self {
            order_id: order.order_id.clone(),
            customer_id: order.customer.customer_id.clone(),
            referrer_id: referrer_id.map(str::to_string),
            amount: order.amount,
            outcome,
            note: note.map(str::to_string),
            earned_event_id: earned_event_id.map(str::to_string),
            payment_method: order.payment_method,
            shipping_address: order
                .shipping_address
                .as_deref()
                .map(normalize_address),
            phone: order.customer.phone.clone(),
            period: crate::types::Period::of(order.finalized_at).key(),
            finalized_day: order.finalized_at.day(),
            finalized_at: order.finalized_at,
            reversal_reason: None,
        }
    }
}

/// Collapse case and whitespace so "12 Main St" and "12  main st " match.
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}
