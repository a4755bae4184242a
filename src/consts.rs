//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Number of past runs `pvshift history` shows by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Prefix of the per-run directory under the system temp dir.
pub const WORK_DIR_PREFIX: &str = "pvshift-";

/// Prefix of rsync's partial-transfer directory inside the destination.
pub const PARTIAL_DIR_PREFIX: &str = ".pvshift-partial-";

/// Prefix of the native copy's staging directory inside the destination.
pub const STAGING_DIR_PREFIX: &str = ".pvshift-staging-";

/// Default database path: `~/.pvshift/pvshift.db`.
/// Single DB for run history and config.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pvshift").join("pvshift.db"))
}

/// Scratch directory for one run (logs, ssh control socket).
pub fn work_dir(task_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{WORK_DIR_PREFIX}{task_id}"))
}

pub fn partial_dir_name(task_id: &str) -> String {
    format!("{PARTIAL_DIR_PREFIX}{task_id}")
}

pub fn staging_dir_name(task_id: &str) -> String {
    format!("{STAGING_DIR_PREFIX}{task_id}")
}
