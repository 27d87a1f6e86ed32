//! Shared primitive types used across the ledger.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount in the minor currency unit (cents, paise, ...).
pub type Money = i64;

/// A commission rate in basis points. 100 bps = 1%.
pub type BasisPoints = u32;

pub type ReferrerId = String;
pub type CustomerId = String;
pub type OrderId = String;
pub type EventId = String;

/// A calendar month. Commission periods and monthly revenue are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Parse a `YYYY-MM` key.
    pub fn parse(key: &str) -> Option<Self> {
        let (year, month) = key.split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(Self { year, month })
    }

    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn days_in_month(&self) -> u32 {
        let next = self.next();
        match (
            NaiveDate::from_ymd_opt(self.year, self.month, 1),
            NaiveDate::from_ymd_opt(next.year, next.month, 1),
        ) {
            (Some(first), Some(following)) => (following - first).num_days() as u32,
            _ => 30,
        }
    }

    /// Last day-of-month that is NOT inside the final `days` of this period.
    pub fn final_days_cutoff(&self, days: u32) -> u32 {
        self.days_in_month().saturating_sub(days)
    }

    /// True when `at` falls within the last `days` days of this period.
    pub fn is_in_final_days(&self, at: DateTime<Utc>, days: u32) -> bool {
        Period::of(at) == *self && at.day() > self.final_days_cutoff(days)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Returned when a persisted enum column holds an unknown value.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_key_round_trips() {
        let p = Period::parse("2024-02").unwrap();
        assert_eq!(p.key(), "2024-02");
        assert!(Period::parse("2024-13").is_none());
        assert!(Period::parse("garbage").is_none());
    }

    #[test]
    fn leap_february_has_29_days() {
        assert_eq!(Period { year: 2024, month: 2 }.days_in_month(), 29);
        assert_eq!(Period { year: 2023, month: 2 }.days_in_month(), 28);
        assert_eq!(Period { year: 2023, month: 12 }.days_in_month(), 31);
    }

    #[test]
    fn final_days_window() {
        let p = Period { year: 2024, month: 4 }; // 30 days
        let late = Utc.with_ymd_and_hms(2024, 4, 28, 12, 0, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 4, 27, 12, 0, 0).unwrap();
        assert!(p.is_in_final_days(late, 3));
        assert!(!p.is_in_final_days(early, 3));
    }
}
