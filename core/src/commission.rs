//! Commission calculator.
//!
//! Bracket-based, NOT marginal: the whole order is charged at the single
//! rate of the band that contains the referrer's month-to-date revenue
//! AFTER the order is added.
//!
//! Rounding: half-up on the minor currency unit,
//!   amount = floor((order_amount * rate_bps + 5_000) / 10_000)

use crate::{
    config::TierBand,
    error::{LedgerError, LedgerResult},
    types::{BasisPoints, Money},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub tier: String,
    pub rate_bps: BasisPoints,
    pub amount: Money,
    pub new_month_to_date_revenue: Money,
}

/// Pure. Same inputs always give the same `Commission`.
pub fn calculate(
    order_amount: Money,
    month_to_date_before: Money,
    tiers: &[TierBand],
) -> LedgerResult<Commission> {
    if order_amount < 0 {
        return Err(LedgerError::InvalidOrder(format!(
            "order amount {order_amount} is negative"
        )));
    }
    if month_to_date_before < 0 {
        return Err(LedgerError::Inconsistent(format!(
            "month-to-date revenue {month_to_date_before} is negative"
        )));
    }

    let new_month_to_date_revenue = month_to_date_before
        .checked_add(order_amount)
        .ok_or_else(|| LedgerError::InvalidOrder("month-to-date revenue overflow".into()))?;

    let band = tiers
        .iter()
        .find(|b| b.contains(new_month_to_date_revenue))
        .ok_or_else(|| {
            LedgerError::InvalidPolicy(format!(
                "no tier covers revenue {new_month_to_date_revenue}"
            ))
        })?;

    Ok(Commission {
        tier: band.label.clone(),
        rate_bps: band.rate_bps,
        amount: apply_rate(order_amount, band.rate_bps),
        new_month_to_date_revenue,
    })
}

/// `round_half_up(amount * rate_bps / 10_000)` for non-negative amounts.
pub fn apply_rate(amount: Money, rate_bps: BasisPoints) -> Money {
    let scaled = amount as i128 * rate_bps as i128;
    ((scaled + 5_000) / 10_000) as Money
}
