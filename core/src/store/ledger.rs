use super::{parse_col, parse_opt_col, ts, LedgerStore};
use crate::{
    error::{LedgerError, LedgerResult},
    ledger::{LedgerEvent, ReversalReason},
    types::Money,
};
use rusqlite::{params, OptionalExtension, Row};

const EVENT_COLUMNS: &str = "event_id, referrer_id, order_id, order_amount, month_revenue_before,
    tier, rate_bps, amount, kind, status, period, reversed, reversal_reason,
    reverses_event_id, reversed_by_event_id, created_at";

impl LedgerStore {
    // ── Ledger events ─────────────────────────────────────────────

    pub fn insert_ledger_event(&self, e: &LedgerEvent) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO ledger_event (
                event_id, referrer_id, order_id, order_amount, month_revenue_before,
                tier, rate_bps, amount, kind, status, period, reversed, reversal_reason,
                reverses_event_id, reversed_by_event_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                e.event_id,
                e.referrer_id,
                e.order_id,
                e.order_amount,
                e.month_revenue_before,
                e.tier,
                e.rate_bps as i64,
                e.amount,
                e.kind.as_str(),
                e.status.as_str(),
                e.period,
                if e.reversed { 1 } else { 0 },
                e.reversal_reason.map(|r| r.as_str()),
                e.reverses_event_id,
                e.reversed_by_event_id,
                e.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn ledger_event(&self, event_id: &str) -> LedgerResult<Option<LedgerEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM ledger_event WHERE event_id = ?1");
        self.conn
            .query_row(&sql, params![event_id], map_event)
            .optional()
            .map_err(Into::into)
    }

    /// The single non-reversed earned event for an order, if any.
    pub fn earned_event_for_order(&self, order_id: &str) -> LedgerResult<Option<LedgerEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM ledger_event
             WHERE order_id = ?1 AND kind = 'earned' AND reversed = 0"
        );
        self.conn
            .query_row(&sql, params![order_id], map_event)
            .optional()
            .map_err(Into::into)
    }

    /// Flip `reversed` on the original event and attach reversal metadata.
    /// The only mutation an event ever receives besides its paid status.
    pub fn mark_event_reversed(
        &self,
        event_id: &str,
        reason: ReversalReason,
        reversed_by: &str,
    ) -> LedgerResult<()> {
        let changed = self.conn.execute(
            "UPDATE ledger_event
             SET reversed = 1, reversal_reason = ?1, reversed_by_event_id = ?2
             WHERE event_id = ?3 AND kind = 'earned' AND reversed = 0",
            params![reason.as_str(), reversed_by, event_id],
        )?;
        if changed != 1 {
            return Err(LedgerError::Inconsistent(format!(
                "event {event_id} could not be marked reversed"
            )));
        }
        Ok(())
    }

    /// Mark a referrer's outstanding earned events as paid. Returns the count.
    pub fn mark_events_paid(&self, referrer_id: &str) -> LedgerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE ledger_event SET status = 'paid'
             WHERE referrer_id = ?1 AND kind = 'earned' AND reversed = 0
               AND status = 'calculated'",
            params![referrer_id],
        )?;
        Ok(changed)
    }

    pub fn events_for_order(&self, order_id: &str) -> LedgerResult<Vec<LedgerEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM ledger_event
             WHERE order_id = ?1 ORDER BY created_at, kind"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![order_id], map_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn events_for_referrer_period(
        &self,
        referrer_id: &str,
        period: &str,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM ledger_event
             WHERE referrer_id = ?1 AND period = ?2
             ORDER BY created_at, event_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![referrer_id, period], map_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn all_events(&self) -> LedgerResult<Vec<LedgerEvent>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM ledger_event ORDER BY rowid");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_event)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Month-to-date revenue: Σ order amount of every earned event in `period`.
    /// Reversals do not reduce it.
    pub fn month_revenue(&self, referrer_id: &str, period: &str) -> LedgerResult<Money> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(order_amount), 0) FROM ledger_event
             WHERE referrer_id = ?1 AND period = ?2 AND kind = 'earned'",
            params![referrer_id, period],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Σ amount of earned events that have not been reversed.
    pub fn sum_active_earned(&self, referrer_id: &str) -> LedgerResult<Money> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_event
             WHERE referrer_id = ?1 AND kind = 'earned' AND reversed = 0",
            params![referrer_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Σ amount of every event, earned and reversal. Equals `sum_active_earned`.
    pub fn sum_all_events(&self, referrer_id: &str) -> LedgerResult<Money> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_event WHERE referrer_id = ?1",
            params![referrer_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn ledger_event_count(&self) -> LedgerResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM ledger_event", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<LedgerEvent> {
    Ok(LedgerEvent {
        event_id: row.get(0)?,
        referrer_id: row.get(1)?,
        order_id: row.get(2)?,
        order_amount: row.get(3)?,
        month_revenue_before: row.get(4)?,
        tier: row.get(5)?,
        rate_bps: row.get::<_, i64>(6)? as u32,
        amount: row.get(7)?,
        kind: parse_col(row, 8)?,
        status: parse_col(row, 9)?,
        period: row.get(10)?,
        reversed: row.get::<_, i32>(11)? != 0,
        reversal_reason: parse_opt_col(row, 12)?,
        reverses_event_id: row.get(13)?,
        reversed_by_event_id: row.get(14)?,
        created_at: ts(row, 15)?,
    })
}
