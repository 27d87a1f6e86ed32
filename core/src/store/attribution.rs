use super::{ts, LedgerStore};
use crate::{attribution::AttributionLink, error::LedgerResult};
use rusqlite::{params, OptionalExtension};

impl LedgerStore {
    // ── Attribution links ─────────────────────────────────────────

    pub fn attribution_for_customer(&self, customer_id: &str) -> LedgerResult<Option<AttributionLink>> {
        self.conn
            .query_row(
                "SELECT customer_id, email, referrer_id, referral_code, attributed_at, locked
                 FROM attribution_link WHERE customer_id = ?1",
                params![customer_id],
                |row| {
                    Ok(AttributionLink {
                        customer_id: row.get(0)?,
                        email: row.get(1)?,
                        referrer_id: row.get(2)?,
                        referral_code: row.get(3)?,
                        attributed_at: ts(row, 4)?,
                        locked: row.get::<_, i32>(5)? != 0,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn insert_attribution(&self, link: &AttributionLink) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO attribution_link
             (customer_id, email, referrer_id, referral_code, attributed_at, locked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.customer_id,
                link.email,
                link.referrer_id,
                link.referral_code,
                link.attributed_at.to_rfc3339(),
                if link.locked { 1 } else { 0 },
            ],
        )?;
        Ok(())
    }

    /// Overwrite an UNLOCKED link. Locked links are left untouched.
    pub fn reassign_attribution(&self, link: &AttributionLink) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE attribution_link
             SET referrer_id = ?1, referral_code = ?2, attributed_at = ?3, locked = ?4
             WHERE customer_id = ?5 AND locked = 0",
            params![
                link.referrer_id,
                link.referral_code,
                link.attributed_at.to_rfc3339(),
                if link.locked { 1 } else { 0 },
                link.customer_id,
            ],
        )?;
        Ok(())
    }

    pub fn lock_attribution(&self, customer_id: &str) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE attribution_link SET locked = 1 WHERE customer_id = ?1",
            params![customer_id],
        )?;
        Ok(())
    }

    pub fn attribution_count(&self, referrer_id: &str) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM attribution_link WHERE referrer_id = ?1",
            params![referrer_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
