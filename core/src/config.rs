//! Program policy: commission tier table and rule knobs.
//!
//! Loaded from `{data_dir}/policy/program_policy.json`. Administrators edit
//! that file; the engine only ever reads a validated snapshot of it.

use crate::{
    error::{LedgerError, LedgerResult},
    types::{BasisPoints, Money},
};
use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Upper bound for a flat rate: 100%.
pub const MAX_RATE_BPS: BasisPoints = 10_000;

// ── Tier table ─────────────────────────────────────────────────────

/// One revenue band `[min, max)`. `max = None` is the unbounded top band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierBand {
    pub label: String,
    pub min: Money,
    #[serde(default)]
    pub max: Option<Money>,
    pub rate_bps: BasisPoints,
}

impl TierBand {
    pub fn contains(&self, revenue: Money) -> bool {
        revenue >= self.min && self.max.map_or(true, |max| revenue < max)
    }

    pub fn rate_percent(&self) -> f64 {
        self.rate_bps as f64 / 100.0
    }
}

// ── Reversal strategy ──────────────────────────────────────────────

/// What to do when a reversal is larger than the unpaid balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClawbackStrategy {
    /// Floor unpaid at zero and queue the excess for manual review.
    #[default]
    FlagForReview,
    /// Take the excess back out of the paid balance.
    AutoClawBack,
}

// ── Fraud thresholds ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FraudThresholds {
    /// Referred accounts allowed to share one shipping address.
    pub shared_address_max: u32,
    pub shared_address_weight: f64,
    /// Referred accounts allowed to share one phone number.
    pub shared_phone_max: u32,
    pub shared_phone_weight: f64,
    /// Cash-on-delivery orders that came back uncollected.
    pub cod_uncollected_max: u32,
    pub cod_uncollected_weight: f64,
    /// Length of the end-of-period window, in days.
    pub end_of_period_days: u32,
    /// Share of monthly revenue allowed inside that window.
    pub end_of_period_share_max: f64,
    pub end_of_period_weight: f64,
    /// Total score at which a referrer is flagged `fraud_suspect`.
    pub suspect_score: f64,
}

// ── Payout cycle ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutCycle {
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutPolicy {
    pub cycle: PayoutCycle,
    /// ISO weekday (1 = Monday) for weekly cycles, day of month for monthly.
    pub day: u32,
    pub minimum_amount: Money,
}

impl PayoutPolicy {
    pub fn is_payout_day(&self, date: NaiveDate) -> bool {
        match self.cycle {
            PayoutCycle::Weekly => date.weekday().number_from_monday() == self.day,
            PayoutCycle::Monthly => date.day() == self.day,
        }
    }
}

// ── Policy document ────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_progress_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    pub tiers: Vec<TierBand>,
    #[serde(default = "default_true")]
    pub block_self_referral: bool,
    #[serde(default)]
    pub allow_code_change_before_first_order: bool,
    #[serde(default)]
    pub require_approval: bool,
    /// Orders this many days after attribution earn nothing. `None` = no limit.
    #[serde(default)]
    pub referral_validity_days: Option<u32>,
    #[serde(default = "default_progress_threshold")]
    pub tier_progress_threshold: f64,
    #[serde(default)]
    pub clawback_strategy: ClawbackStrategy,
    pub fraud: FraudThresholds,
    pub payout: PayoutPolicy,
}

impl PolicyConfig {
    /// Load and validate the policy from a data directory.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/policy/program_policy.json");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read policy file {path}"))?;
        let config: PolicyConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse policy file {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Tier bands must be ordered, contiguous, non-overlapping and cover `[0, ∞)`.
    pub fn validate(&self) -> LedgerResult<()> {
        let Some(first) = self.tiers.first() else {
            return Err(LedgerError::InvalidPolicy("tier table is empty".into()));
        };
        if first.min != 0 {
            return Err(LedgerError::InvalidPolicy(format!(
                "first tier '{}' must start at 0, starts at {}",
                first.label, first.min
            )));
        }

        for (i, band) in self.tiers.iter().enumerate() {
            if band.rate_bps > MAX_RATE_BPS {
                return Err(LedgerError::InvalidPolicy(format!(
                    "tier '{}' rate {} bps exceeds {MAX_RATE_BPS}",
                    band.label, band.rate_bps
                )));
            }
            let is_last = i + 1 == self.tiers.len();
            match (band.max, is_last) {
                (None, true) => {}
                (None, false) => {
                    return Err(LedgerError::InvalidPolicy(format!(
                        "unbounded tier '{}' must be the last band",
                        band.label
                    )))
                }
                (Some(_), true) => {
                    return Err(LedgerError::InvalidPolicy(format!(
                        "last tier '{}' must be unbounded",
                        band.label
                    )))
                }
                (Some(max), false) => {
                    if max <= band.min {
                        return Err(LedgerError::InvalidPolicy(format!(
                            "tier '{}' is empty: [{}, {})",
                            band.label, band.min, max
                        )));
                    }
                    let next = &self.tiers[i + 1];
                    if next.min != max {
                        return Err(LedgerError::InvalidPolicy(format!(
                            "tiers '{}' and '{}' are not contiguous ({} != {})",
                            band.label, next.label, max, next.min
                        )));
                    }
                }
            }
        }

        if !(0.0..=1.0).contains(&self.tier_progress_threshold) {
            return Err(LedgerError::InvalidPolicy(format!(
                "tier_progress_threshold {} must be within [0, 1]",
                self.tier_progress_threshold
            )));
        }
        let day_ok = match self.payout.cycle {
            PayoutCycle::Weekly => (1..=7).contains(&self.payout.day),
            PayoutCycle::Monthly => (1..=28).contains(&self.payout.day),
        };
        if !day_ok {
            return Err(LedgerError::InvalidPolicy(format!(
                "payout day {} is invalid for a {:?} cycle",
                self.payout.day, self.payout.cycle
            )));
        }
        Ok(())
    }

    /// The band containing `revenue`, with its index.
    pub fn band_for(&self, revenue: Money) -> Option<(usize, &TierBand)> {
        self.tiers.iter().enumerate().find(|(_, b)| b.contains(revenue))
    }

    /// Policy used by unit and integration tests.
    /// Tiers: [0, 10M) = 1%, [10M, 50M) = 2%, [50M, ∞) = 3%.
    pub fn default_test() -> Self {
        Self {
            tiers: vec![
                TierBand {
                    label: "bronze".into(),
                    min: 0,
                    max: Some(10_000_000),
                    rate_bps: 100,
                },
                TierBand {
                    label: "silver".into(),
                    min: 10_000_000,
                    max: Some(50_000_000),
                    rate_bps: 200,
                },
                TierBand {
                    label: "gold".into(),
                    min: 50_000_000,
                    max: None,
                    rate_bps: 300,
                },
            ],
            block_self_referral: true,
            allow_code_change_before_first_order: false,
            require_approval: false,
            referral_validity_days: None,
            tier_progress_threshold: 0.8,
            clawback_strategy: ClawbackStrategy::FlagForReview,
            fraud: FraudThresholds {
                shared_address_max: 3,
                shared_address_weight: 0.40,
                shared_phone_max: 3,
                shared_phone_weight: 0.30,
                cod_uncollected_max: 2,
                cod_uncollected_weight: 0.30,
                end_of_period_days: 3,
                end_of_period_share_max: 0.60,
                end_of_period_weight: 0.30,
                suspect_score: 0.60,
            },
            payout: PayoutPolicy {
                cycle: PayoutCycle::Monthly,
                day: 5,
                minimum_amount: 100_000,
            },
        }
    }
}
