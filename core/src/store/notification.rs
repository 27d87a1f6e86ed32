use super::{parse_col, LedgerStore};
use crate::{
    error::LedgerResult,
    notification::{NotificationKind, QueuedNotification, ReferrerNotification},
};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl LedgerStore {
    // ── Notification outbox ───────────────────────────────────────

    pub fn enqueue_notification(
        &self,
        notification: &ReferrerNotification,
        period: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerResult<QueuedNotification> {
        self.conn.execute(
            "INSERT INTO notification (referrer_id, kind, period, payload, delivered, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                notification.referrer_id(),
                notification.kind().as_str(),
                period,
                serde_json::to_string(notification)?,
                at.to_rfc3339(),
            ],
        )?;
        Ok(QueuedNotification {
            notification_id: self.conn.last_insert_rowid(),
            notification: notification.clone(),
        })
    }

    /// The de-duplication query: has `kind` been requested for this referrer in `period`?
    pub fn notification_exists(
        &self,
        referrer_id: &str,
        kind: NotificationKind,
        period: &str,
    ) -> LedgerResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notification
             WHERE referrer_id = ?1 AND kind = ?2 AND period = ?3",
            params![referrer_id, kind.as_str(), period],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn mark_notification_delivered(&self, notification_id: i64) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE notification SET delivered = 1 WHERE notification_id = ?1",
            params![notification_id],
        )?;
        Ok(())
    }

    pub fn undelivered_notifications(&self) -> LedgerResult<Vec<QueuedNotification>> {
        let mut stmt = self.conn.prepare(
            "SELECT notification_id, payload FROM notification
             WHERE delivered = 0 ORDER BY notification_id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(notification_id, payload)| {
                Ok(QueuedNotification {
                    notification_id,
                    notification: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    pub fn notification_count(&self, referrer_id: &str, kind: NotificationKind) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notification WHERE referrer_id = ?1 AND kind = ?2",
            params![referrer_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn notification_kinds(&self, referrer_id: &str) -> LedgerResult<Vec<NotificationKind>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind FROM notification WHERE referrer_id = ?1 ORDER BY notification_id",
        )?;
        let rows = stmt.query_map(params![referrer_id], |row| parse_col(row, 0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
