//! Tier progress notifier.
//!
//! progress = (revenue - band.min) / (band.max - band.min)
//! Notify when progress >= threshold, at most once per referrer per month.
//! The unbounded top band never notifies.

use crate::{
    config::{PolicyConfig, TierBand},
    error::{LedgerError, LedgerResult},
    notification::NotificationKind,
    store::LedgerStore,
    types::{Money, Period},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierProgress {
    pub should_notify: bool,
    pub current_tier: String,
    pub next_tier: Option<String>,
    pub remaining_amount: Option<Money>,
    pub progress: f64,
}

/// Position of `revenue` inside its band. Pure; no de-duplication.
pub fn position(tiers: &[TierBand], revenue: Money, threshold: f64) -> LedgerResult<TierProgress> {
    let (index, band) = tiers
        .iter()
        .enumerate()
        .find(|(_, b)| b.contains(revenue))
        .ok_or_else(|| LedgerError::InvalidPolicy(format!("no tier covers revenue {revenue}")))?;

    let Some(max) = band.max else {
        return Ok(TierProgress {
            should_notify: false,
            current_tier: band.label.clone(),
            next_tier: None,
            remaining_amount: None,
            progress: 0.0,
        });
    };

    let width = (max - band.min) as f64;
    let progress = (revenue - band.min) as f64 / width;
    Ok(TierProgress {
        should_notify: progress >= threshold,
        current_tier: band.label.clone(),
        next_tier: tiers.get(index + 1).map(|b| b.label.clone()),
        remaining_amount: Some(max - revenue),
        progress,
    })
}

/// `checkProgress(referrer, newMonthToDateRevenue)`.
///
/// `should_notify` is cleared when a tier-progress request was already
/// recorded for this referrer in `period`.
pub fn check_progress(
    store: &LedgerStore,
    policy: &PolicyConfig,
    referrer_id: &str,
    new_month_to_date_revenue: Money,
    period: &Period,
) -> LedgerResult<TierProgress> {
    let mut progress = position(
        &policy.tiers,
        new_month_to_date_revenue,
        policy.tier_progress_threshold,
    )?;
    if progress.should_notify
        && store.notification_exists(referrer_id, NotificationKind::TierProgress, &period.key())?
    {
        log::debug!("Tier progress for {referrer_id} already notified in {period}");
        progress.should_notify = false;
    }
    Ok(progress)
}
