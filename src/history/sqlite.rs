use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

use super::{History, HistoryEntry, RunRecord};

/// SQLite-backed run history.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open or create the history table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open history database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                record TEXT NOT NULL
            );",
        )
        .context("failed to create history table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("history database lock poisoned"))
    }
}

#[async_trait]
impl History for SqliteHistory {
    async fn store(&self, record: RunRecord) -> Result<()> {
        let json = serde_json::to_string(&record)?;
        let conn = self.conn()?;
        conn.execute("INSERT INTO run_history (record) VALUES (?1)", [&json])?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        // Newest `limit` rows, handed back oldest first.
        let mut stmt = conn.prepare(
            "SELECT timestamp, record FROM (
                SELECT id, timestamp, record FROM run_history ORDER BY id DESC LIMIT ?1
            ) ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(timestamp, json)| {
                Ok(HistoryEntry {
                    timestamp,
                    record: serde_json::from_str(&json).context("corrupt history record")?,
                })
            })
            .collect()
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM run_history", [])?;
        Ok(())
    }
}
