use super::{parse_col, parse_opt_col, ts, LedgerStore};
use crate::{
    error::LedgerResult,
    ledger::ReversalReason,
    order::OrderRecord,
    types::Money,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl LedgerStore {
    // ── Processed-order marker ────────────────────────────────────

    pub fn order(&self, order_id: &str) -> LedgerResult<Option<OrderRecord>> {
        self.conn
            .query_row(
                "SELECT order_id, customer_id, referrer_id, amount, outcome, note,
                        earned_event_id, payment_method, shipping_address, phone,
                        period, finalized_day, finalized_at, reversal_reason
                 FROM customer_order WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok(OrderRecord {
                        order_id: row.get(0)?,
                        customer_id: row.get(1)?,
                        referrer_id: row.get(2)?,
                        amount: row.get(3)?,
                        outcome: parse_col(row, 4)?,
                        note: row.get(5)?,
                        earned_event_id: row.get(6)?,
                        payment_method: parse_col(row, 7)?,
                        shipping_address: row.get(8)?,
                        phone: row.get(9)?,
                        period: row.get(10)?,
                        finalized_day: row.get::<_, i64>(11)? as u32,
                        finalized_at: ts(row, 12)?,
                        reversal_reason: row.get(13)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fails on a second insert for the same order id (primary key).
    pub fn insert_order(&self, o: &OrderRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO customer_order (
                order_id, customer_id, referrer_id, amount, outcome, note,
                earned_event_id, payment_method, shipping_address, phone,
                period, finalized_day, finalized_at, reversal_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                o.order_id,
                o.customer_id,
                o.referrer_id,
                o.amount,
                o.outcome.as_str(),
                o.note,
                o.earned_event_id,
                o.payment_method.as_str(),
                o.shipping_address,
                o.phone,
                o.period,
                o.finalized_day as i64,
                o.finalized_at.to_rfc3339(),
                o.reversal_reason,
            ],
        )?;
        Ok(())
    }

    pub fn mark_order_reversed(
        &self,
        order_id: &str,
        reason: ReversalReason,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE customer_order SET reversal_reason = ?1, reversed_at = ?2
             WHERE order_id = ?3 AND reversal_reason IS NULL",
            params![reason.as_str(), at.to_rfc3339(), order_id],
        )?;
        Ok(())
    }

    /// True once the customer has at least one commissioned order.
    pub fn customer_has_commissioned_order(&self, customer_id: &str) -> LedgerResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM customer_order
             WHERE customer_id = ?1 AND outcome = 'commissioned'",
            params![customer_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn order_count(&self) -> LedgerResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM customer_order", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Parked reversals ──────────────────────────────────────────

    /// Keep a reversal that arrived before its order. First reason wins.
    pub fn park_reversal(
        &self,
        order_id: &str,
        reason: ReversalReason,
        received_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO pending_reversal (order_id, reason, received_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(order_id) DO NOTHING",
            params![order_id, reason.as_str(), received_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove and return the parked reversal for `order_id`, if any.
    pub fn take_parked_reversal(
        &self,
        order_id: &str,
    ) -> LedgerResult<Option<(ReversalReason, DateTime<Utc>)>> {
        let parked = self
            .conn
            .query_row(
                "SELECT reason, received_at FROM pending_reversal WHERE order_id = ?1",
                params![order_id],
                |row| Ok((parse_col::<ReversalReason>(row, 0)?, ts(row, 1)?)),
            )
            .optional()?;
        if parked.is_some() {
            self.conn.execute(
                "DELETE FROM pending_reversal WHERE order_id = ?1",
                params![order_id],
            )?;
        }
        Ok(parked)
    }

    pub fn parked_reversal_count(&self) -> LedgerResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_reversal", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Fraud signal inputs ───────────────────────────────────────

    /// Largest number of distinct referred customers sharing one shipping address.
    pub fn max_customers_sharing_address(&self, referrer_id: &str) -> LedgerResult<u32> {
        let max: Option<i64> = self
            .conn
            .query_row(
                "SELECT COUNT(DISTINCT customer_id) AS n
                 FROM customer_order
                 WHERE referrer_id = ?1 AND shipping_address IS NOT NULL
                 GROUP BY shipping_address
                 ORDER BY n DESC LIMIT 1",
                params![referrer_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(max.unwrap_or(0) as u32)
    }

    /// Largest number of distinct referred customers sharing one phone number.
    pub fn max_customers_sharing_phone(&self, referrer_id: &str) -> LedgerResult<u32> {
        let max: Option<i64> = self
            .conn
            .query_row(
                "SELECT COUNT(DISTINCT customer_id) AS n
                 FROM customer_order
                 WHERE referrer_id = ?1 AND phone IS NOT NULL
                 GROUP BY phone
                 ORDER BY n DESC LIMIT 1",
                params![referrer_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(max.unwrap_or(0) as u32)
    }

    /// COD orders that came back returned or cancelled.
    pub fn uncollected_cod_orders(&self, referrer_id: &str) -> LedgerResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM customer_order
             WHERE referrer_id = ?1 AND payment_method = 'cod'
               AND reversal_reason IN ('order_returned', 'order_cancelled')",
            params![referrer_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// (total, after-cutoff) commissioned order amount in `period`.
    pub fn period_revenue_split(
        &self,
        referrer_id: &str,
        period: &str,
        cutoff_day: u32,
    ) -> LedgerResult<(Money, Money)> {
        let split = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0),
                    COALESCE(SUM(CASE WHEN finalized_day > ?3 THEN amount ELSE 0 END), 0)
             FROM customer_order
             WHERE referrer_id = ?1 AND period = ?2 AND outcome = 'commissioned'",
            params![referrer_id, period, cutoff_day as i64],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(split)
    }

    /// Reversal reason recorded on the order, if any.
    pub fn order_reversal_reason(&self, order_id: &str) -> LedgerResult<Option<ReversalReason>> {
        let reason = self
            .conn
            .query_row(
                "SELECT reversal_reason FROM customer_order WHERE order_id = ?1",
                params![order_id],
                |row| parse_opt_col::<ReversalReason>(row, 0),
            )
            .optional()?;
        Ok(reason.flatten())
    }
}
