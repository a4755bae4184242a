use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Engine, ExecutionOutcome};
use crate::events::{Event, EventBus};
use crate::strategy::{Strategy, names, rank};
use crate::task::Task;

/// Probes strategies one at a time in rank order and runs the first one
/// that can do the task.
#[derive(Default)]
pub struct SequentialEngine {
    events: Option<Arc<EventBus>>,
}

impl SequentialEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report progress on `events` as well as through tracing.
    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
        }
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Await a strategy call, turning a panic into an error.
async fn guarded<F>(what: &str, call: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(anyhow!("{what} panicked: {}", panic_message(&*payload))))
}

#[async_trait]
impl Engine for SequentialEngine {
    async fn execute(&self, task: &Task, strategies: &[Arc<dyn Strategy>]) -> ExecutionOutcome {
        let ranked = rank(strategies);
        debug!(task = %task.id, order = ?names(&ranked), "ranked strategies");

        let mut selected = None;
        for strategy in &ranked {
            if task.cancel.is_cancelled() {
                info!(task = %task.id, "cancelled while probing");
                break;
            }
            self.emit(Event::Probing {
                strategy: strategy.name().to_string(),
            });
            if strategy.can_do(task).await {
                selected = Some(Arc::clone(strategy));
                break;
            }
            debug!(task = %task.id, strategy = strategy.name(), "not feasible");
            self.emit(Event::Rejected {
                strategy: strategy.name().to_string(),
            });
        }

        let Some(strategy) = selected else {
            let attempted = names(&ranked);
            warn!(task = %task.id, ?attempted, "no feasible strategy");
            self.emit(Event::NoneFeasible {
                attempted: attempted.clone(),
            });
            return ExecutionOutcome::NoneFeasible { attempted };
        };

        let name = strategy.name().to_string();
        info!(task = %task.id, strategy = %name, "selected strategy");
        self.emit(Event::Selected {
            strategy: name.clone(),
        });

        let run = guarded("run", strategy.run(task)).await;
        match &run {
            Ok(()) => info!(task = %task.id, strategy = %name, "run succeeded"),
            Err(e) => warn!(task = %task.id, strategy = %name, error = %format!("{e:#}"), "run failed"),
        }
        self.emit(Event::RunFinished {
            strategy: name.clone(),
            success: run.is_ok(),
        });

        let cleanup = guarded("cleanup", strategy.cleanup(task)).await;
        if let Err(e) = &cleanup {
            warn!(task = %task.id, strategy = %name, error = %format!("{e:#}"), "cleanup failed");
        }
        self.emit(Event::CleanupFinished {
            strategy: name.clone(),
            success: cleanup.is_ok(),
        });

        ExecutionOutcome::Executed {
            strategy: name,
            run,
            cleanup,
        }
    }
}
