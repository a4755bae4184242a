pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::ExecutionOutcome;
use crate::task::Task;

/// What one engine cycle did, in a form that survives the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub task_id: String,
    pub source: String,
    pub dest: String,
    /// Strategy that ran, or `None` when nothing was feasible.
    pub strategy: Option<String>,
    /// Strategies probed without success, in rank order. Only filled when
    /// nothing was feasible.
    pub attempted: Vec<String>,
    pub run_error: Option<String>,
    pub cleanup_error: Option<String>,
    /// The job was cancelled (Ctrl+C) before it finished.
    #[serde(default)]
    pub interrupted: bool,
}

impl RunRecord {
    pub fn from_outcome(task: &Task, outcome: &ExecutionOutcome) -> Self {
        let mut record = Self {
            task_id: task.id.clone(),
            source: task.source.to_string(),
            dest: task.dest.to_string(),
            strategy: None,
            attempted: Vec::new(),
            run_error: None,
            cleanup_error: None,
            interrupted: task.cancel.is_cancelled(),
        };
        match outcome {
            ExecutionOutcome::NoneFeasible { attempted } => {
                record.attempted = attempted.clone();
            }
            ExecutionOutcome::Executed {
                strategy,
                run,
                cleanup,
            } => {
                record.strategy = Some(strategy.clone());
                record.run_error = run.as_ref().err().map(|e| format!("{e:#}"));
                record.cleanup_error = cleanup.as_ref().err().map(|e| format!("{e:#}"));
            }
        }
        record
    }

    pub fn succeeded(&self) -> bool {
        self.strategy.is_some()
            && self.run_error.is_none()
            && self.cleanup_error.is_none()
            && !self.interrupted
    }
}

/// A stored record with the time it was written (UTC, `YYYY-MM-DD HH:MM:SS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub record: RunRecord,
}

/// Where finished runs are remembered.
#[async_trait]
pub trait History: Send + Sync {
    async fn store(&self, record: RunRecord) -> Result<()>;
    /// The last `limit` records, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>>;
    async fn clear(&self) -> Result<()>;
}
