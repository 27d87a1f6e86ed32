use super::{parse_col, ts, LedgerStore};
use crate::{
    error::{LedgerError, LedgerResult},
    referrer::{Referrer, ReferrerStatus},
};
use rusqlite::{params, OptionalExtension, Row};

const REFERRER_COLUMNS: &str = "referrer_id, name, email, phone, referral_code, status,
    lifetime_revenue, current_month_revenue, revenue_period, unpaid_commission,
    paid_commission, clawback_due, fraud_score, referred_customers, version, created_at";

impl LedgerStore {
    // ── Referrer ──────────────────────────────────────────────────

    pub fn insert_referrer(&self, r: &Referrer) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO referrer (
                referrer_id, name, email, phone, referral_code, status,
                lifetime_revenue, current_month_revenue, revenue_period, unpaid_commission,
                paid_commission, clawback_due, fraud_score, referred_customers, version, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                r.referrer_id,
                r.name,
                r.email,
                r.phone,
                r.referral_code,
                r.status.as_str(),
                r.lifetime_revenue,
                r.current_month_revenue,
                r.revenue_period,
                r.unpaid_commission,
                r.paid_commission,
                r.clawback_due,
                r.fraud_score,
                r.referred_customers,
                r.version,
                r.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn referrer(&self, referrer_id: &str) -> LedgerResult<Option<Referrer>> {
        let sql = format!("SELECT {REFERRER_COLUMNS} FROM referrer WHERE referrer_id = ?1");
        self.conn
            .query_row(&sql, params![referrer_id], map_referrer)
            .optional()
            .map_err(Into::into)
    }

    pub fn require_referrer(&self, referrer_id: &str) -> LedgerResult<Referrer> {
        self.referrer(referrer_id)?
            .ok_or_else(|| LedgerError::ReferrerNotFound {
                referrer_id: referrer_id.to_string(),
            })
    }

    pub fn referrer_by_code(&self, code: &str) -> LedgerResult<Option<Referrer>> {
        let sql = format!("SELECT {REFERRER_COLUMNS} FROM referrer WHERE referral_code = ?1");
        self.conn
            .query_row(&sql, params![code], map_referrer)
            .optional()
            .map_err(Into::into)
    }

    pub fn referral_code_exists(&self, code: &str) -> LedgerResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM referrer WHERE referral_code = ?1",
            params![code],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn all_referrers(&self) -> LedgerResult<Vec<Referrer>> {
        let sql = format!("SELECT {REFERRER_COLUMNS} FROM referrer ORDER BY created_at, referrer_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_referrer)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn referrer_ids(&self) -> LedgerResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT referrer_id FROM referrer ORDER BY created_at, referrer_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Write balance and revenue fields if the row is still at `expected_version`.
    /// Bumps the version. Fails with `ConcurrentModification` otherwise.
    pub fn update_referrer_balances(&self, r: &Referrer, expected_version: i64) -> LedgerResult<()> {
        let changed = self.conn.execute(
            "UPDATE referrer SET
                lifetime_revenue = ?1,
                current_month_revenue = ?2,
                revenue_period = ?3,
                unpaid_commission = ?4,
                paid_commission = ?5,
                clawback_due = ?6,
                version = version + 1
             WHERE referrer_id = ?7 AND version = ?8",
            params![
                r.lifetime_revenue,
                r.current_month_revenue,
                r.revenue_period,
                r.unpaid_commission,
                r.paid_commission,
                r.clawback_due,
                r.referrer_id,
                expected_version,
            ],
        )?;
        if changed == 0 {
            return Err(LedgerError::ConcurrentModification {
                referrer_id: r.referrer_id.clone(),
            });
        }
        Ok(())
    }

    pub fn set_referrer_status(&self, referrer_id: &str, status: ReferrerStatus) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE referrer SET status = ?1 WHERE referrer_id = ?2",
            params![status.as_str(), referrer_id],
        )?;
        Ok(())
    }

    pub fn set_fraud_score(&self, referrer_id: &str, score: f64) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE referrer SET fraud_score = ?1 WHERE referrer_id = ?2",
            params![score, referrer_id],
        )?;
        Ok(())
    }

    pub fn adjust_referred_customers(&self, referrer_id: &str, delta: i64) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE referrer SET referred_customers = MAX(referred_customers + ?1, 0)
             WHERE referrer_id = ?2",
            params![delta, referrer_id],
        )?;
        Ok(())
    }

    pub fn referrer_count(&self, status: ReferrerStatus) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM referrer WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_referrer(row: &Row<'_>) -> rusqlite::Result<Referrer> {
    Ok(Referrer {
        referrer_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        referral_code: row.get(4)?,
        status: parse_col(row, 5)?,
        lifetime_revenue: row.get(6)?,
        current_month_revenue: row.get(7)?,
        revenue_period: row.get(8)?,
        unpaid_commission: row.get(9)?,
        paid_commission: row.get(10)?,
        clawback_due: row.get(11)?,
        fraud_score: row.get(12)?,
        referred_customers: row.get(13)?,
        version: row.get(14)?,
        created_at: ts(row, 15)?,
    })
}
