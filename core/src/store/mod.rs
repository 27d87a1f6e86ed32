//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! Components call store methods and never execute SQL directly.
//!
//! Store methods do NOT open transactions. Balance-affecting work is
//! wrapped by the engine in `atomically()`, which holds a write lock
//! (`BEGIN IMMEDIATE`) for its whole duration.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, Row, Transaction, TransactionBehavior};
use std::{str::FromStr, time::Duration};

mod attribution;
mod audit;
mod ledger;
mod notification;
mod order;
mod referrer;

/// How long a connection waits for another writer before SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl LedgerStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // `:memory:` reports journal mode "memory" and carries on.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> LedgerResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_referrers.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_attribution.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_orders.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_audit.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/006_notifications.sql"))?;
        Ok(())
    }

    /// Run `f` as one atomic unit. Any `Err` rolls back every write `f` made.
    ///
    /// Not re-entrant: `f` must not call `atomically` again.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> LedgerResult<T>) -> LedgerResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Policy history ─────────────────────────────────────────────

    pub fn insert_policy_version(
        &self,
        version: u64,
        config_json: &str,
        published_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO policy_version (version, config_json, published_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(version) DO UPDATE SET
                config_json = excluded.config_json,
                published_at = excluded.published_at",
            params![version as i64, config_json, published_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn latest_policy_version(&self) -> LedgerResult<Option<(u64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, config_json FROM policy_version
             ORDER BY version DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
        })?;
        rows.next().transpose().map_err(LedgerError::from)
    }
}

// ── Row helpers ────────────────────────────────────────────────────

/// Read an RFC 3339 timestamp column.
pub(crate) fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a text column into any enum that implements `FromStr`.
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Nullable variant of `parse_col`.
pub(crate) fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal_mode(store: &LedgerStore) -> String {
        store
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn file_store_opens_in_wal_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.db");
        let store = LedgerStore::open(path.to_str().unwrap()).unwrap();
        store.migrate().unwrap();
        assert_eq!(journal_mode(&store), "wal");
        assert_eq!(journal_mode(&store.reopen().unwrap()), "wal");
    }

    #[test]
    fn memory_path_opens_without_wal() {
        let store = LedgerStore::open(":memory:").unwrap();
        store.migrate().unwrap();
        assert_eq!(journal_mode(&store), "memory");
    }

    #[test]
    fn unopenable_path_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing").join("ledger.db");
        assert!(LedgerStore::open(path.to_str().unwrap()).is_err());
    }
}
