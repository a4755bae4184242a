//! Key-value settings backed by SQLite.
//!
//! Shares a database with [`SqliteHistory`](crate::history::sqlite::SqliteHistory);
//! pass the same path to both. Only the keys in [`KNOWN_KEYS`] are accepted,
//! and values are checked when written so reads can trust them.

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::MigrateError;
use crate::strategy::is_kebab_case;

pub const DISABLED_STRATEGIES: &str = "strategies.disabled";
pub const SSH_PORT: &str = "ssh.port";
pub const SSH_IDENTITY: &str = "ssh.identity";
pub const TIMEOUT_SECS: &str = "timeout.secs";

pub const KNOWN_KEYS: &[&str] = &[DISABLED_STRATEGIES, SSH_PORT, SSH_IDENTITY, TIMEOUT_SECS];

/// Defaults for `migrate`, read from the store. Command-line flags win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub disabled_strategies: Vec<String>,
    pub ssh_port: Option<u16>,
    pub ssh_identity: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

/// Persistent key-value configuration store.
pub struct Config {
    conn: Mutex<Connection>,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reject values that would not parse back on read.
fn validate(key: &str, value: &str) -> Result<(), MigrateError> {
    let invalid = |why: &str| MigrateError::config(format!("{key}: {why}"));
    match key {
        DISABLED_STRATEGIES => match split_list(value).iter().find(|n| !is_kebab_case(n)) {
            Some(bad) => Err(invalid(&format!("{bad:?} is not a strategy name"))),
            None => Ok(()),
        },
        SSH_PORT => match value.parse::<u16>() {
            Ok(0) | Err(_) => Err(invalid("expected a port number (1-65535)")),
            Ok(_) => Ok(()),
        },
        SSH_IDENTITY if value.trim().is_empty() => Err(invalid("expected a file path")),
        SSH_IDENTITY => Ok(()),
        TIMEOUT_SECS => match value.parse::<u64>() {
            Ok(0) | Err(_) => Err(invalid("expected a positive number of seconds")),
            Ok(_) => Ok(()),
        },
        _ => Err(MigrateError::config(format!(
            "unknown key {key:?} (known: {})",
            KNOWN_KEYS.join(", ")
        ))),
    }
}

impl Config {
    /// Open or create the config table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open config database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create config table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("config database lock poisoned"))
    }

    /// Get a config value by key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Set a known key after checking its value (upsert).
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Remove a config key.
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Every stored pair, sorted by key.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key ASC")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Typed view of the stored settings.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::default();
        if let Some(value) = self.get(DISABLED_STRATEGIES)? {
            settings.disabled_strategies = split_list(&value);
        }
        if let Some(value) = self.get(SSH_PORT)? {
            settings.ssh_port = Some(value.parse().with_context(|| format!("bad {SSH_PORT}"))?);
        }
        if let Some(value) = self.get(SSH_IDENTITY)? {
            settings.ssh_identity = Some(PathBuf::from(value));
        }
        if let Some(value) = self.get(TIMEOUT_SECS)? {
            let secs: u64 = value.parse().with_context(|| format!("bad {TIMEOUT_SECS}"))?;
            settings.timeout = Some(Duration::from_secs(secs));
        }
        Ok(settings)
    }
}
