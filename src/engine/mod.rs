pub mod sequential;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::MigrateError;
use crate::strategy::Strategy;
use crate::task::Task;

/// The outermost boundary. main.rs only knows this trait.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Pick the best feasible strategy for `task`, run it and clean up.
    async fn execute(&self, task: &Task, strategies: &[Arc<dyn Strategy>]) -> ExecutionOutcome;
}

/// What happened during one engine cycle.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// No strategy could handle the task. Nothing was run or cleaned up.
    NoneFeasible { attempted: Vec<String> },
    /// A strategy was selected, run once and cleaned up once.
    Executed {
        strategy: String,
        run: Result<()>,
        cleanup: Result<()>,
    },
}

impl ExecutionOutcome {
    /// Name of the selected strategy, if any.
    pub fn selected(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::NoneFeasible { .. } => None,
            ExecutionOutcome::Executed { strategy, .. } => Some(strategy),
        }
    }

    pub fn run_succeeded(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { run: Ok(()), .. })
    }

    pub fn cleanup_succeeded(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { cleanup: Ok(()), .. })
    }

    pub fn is_success(&self) -> bool {
        self.run_succeeded() && self.cleanup_succeeded()
    }

    /// Collapse into the selected strategy's name or a single error. A run
    /// error is primary and carries any cleanup error with it.
    pub fn into_result(self) -> Result<String, MigrateError> {
        match self {
            ExecutionOutcome::NoneFeasible { attempted } => {
                Err(MigrateError::NoFeasibleStrategy { attempted })
            }
            ExecutionOutcome::Executed {
                strategy,
                run: Err(error),
                cleanup,
            } => Err(MigrateError::Run {
                strategy,
                error,
                cleanup: cleanup.err(),
            }),
            ExecutionOutcome::Executed {
                strategy,
                run: Ok(()),
                cleanup: Err(error),
            } => Err(MigrateError::Cleanup { strategy, error }),
            ExecutionOutcome::Executed { strategy, .. } => Ok(strategy),
        }
    }
}
