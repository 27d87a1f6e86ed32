use super::{parse_col, ts, LedgerStore};
use crate::{
    audit::{AuditEntry, BalanceSnapshot},
    error::LedgerResult,
    types::Money,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const AUDIT_COLUMNS: &str = "audit_id, referrer_id, action, actor, reason, order_id, event_id,
    unpaid_before, paid_before, clawback_before, unpaid_after, paid_after, clawback_after,
    created_at";

/// A reversal excess waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClawbackReviewRow {
    pub review_id: i64,
    pub referrer_id: String,
    pub order_id: String,
    pub event_id: String,
    pub excess_amount: Money,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerStore {
    // ── Audit trail (append-only) ─────────────────────────────────

    pub fn insert_audit_entry(&self, e: &AuditEntry) -> LedgerResult<i64> {
        self.conn.execute(
            "INSERT INTO audit_entry (
                referrer_id, action, actor, reason, order_id, event_id,
                unpaid_before, paid_before, clawback_before,
                unpaid_after, paid_after, clawback_after, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                e.referrer_id,
                e.action.as_str(),
                e.actor,
                e.reason,
                e.order_id,
                e.event_id,
                e.before.unpaid,
                e.before.paid,
                e.before.clawback_due,
                e.after.unpaid,
                e.after.paid,
                e.after.clawback_due,
                e.created_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn audit_trail(&self, referrer_id: &str) -> LedgerResult<Vec<AuditEntry>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entry WHERE referrer_id = ?1 ORDER BY audit_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![referrer_id], map_audit)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn latest_audit_entry(&self, referrer_id: &str) -> LedgerResult<Option<AuditEntry>> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_entry WHERE referrer_id = ?1
             ORDER BY audit_id DESC LIMIT 1"
        );
        self.conn
            .query_row(&sql, params![referrer_id], map_audit)
            .optional()
            .map_err(Into::into)
    }

    pub fn audit_entry_count(&self) -> LedgerResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM audit_entry", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Clawback review queue ─────────────────────────────────────

    pub fn insert_clawback_review(
        &self,
        referrer_id: &str,
        order_id: &str,
        event_id: &str,
        excess_amount: Money,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO clawback_review
             (referrer_id, order_id, event_id, excess_amount, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'open', ?5)",
            params![referrer_id, order_id, event_id, excess_amount, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn open_clawback_reviews(&self) -> LedgerResult<Vec<ClawbackReviewRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT review_id, referrer_id, order_id, event_id, excess_amount, status, created_at
             FROM clawback_review WHERE status = 'open' ORDER BY review_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ClawbackReviewRow {
                review_id: row.get(0)?,
                referrer_id: row.get(1)?,
                order_id: row.get(2)?,
                event_id: row.get(3)?,
                excess_amount: row.get(4)?,
                status: row.get(5)?,
                created_at: ts(row, 6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn map_audit(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        audit_id: Some(row.get(0)?),
        referrer_id: row.get(1)?,
        action: parse_col(row, 2)?,
        actor: row.get(3)?,
        reason: row.get(4)?,
        order_id: row.get(5)?,
        event_id: row.get(6)?,
        before: BalanceSnapshot {
            unpaid: row.get(7)?,
            paid: row.get(8)?,
            clawback_due: row.get(9)?,
        },
        after: BalanceSnapshot {
            unpaid: row.get(10)?,
            paid: row.get(11)?,
            clawback_due: row.get(12)?,
        },
        created_at: ts(row, 13)?,
    })
}
