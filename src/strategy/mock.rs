use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::Strategy;
use crate::error::ErrorList;
use crate::task::Task;

/// Shared, ordered record of calls made to mock strategies, e.g.
/// `["can_do:a", "run:a", "cleanup:a"]`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: &str, name: &str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{call}:{name}"));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `call` (e.g. `"cleanup"`) hit the named strategy.
    pub fn count(&self, call: &str, name: &str) -> usize {
        let wanted = format!("{call}:{name}");
        self.calls().iter().filter(|c| **c == wanted).count()
    }
}

/// A scripted strategy for tests.
pub struct MockStrategy {
    name: String,
    priority: i32,
    feasible: bool,
    run_error: Option<String>,
    run_panics: bool,
    cleanup_errors: Vec<String>,
    log: CallLog,
    runs: AtomicUsize,
}

impl MockStrategy {
    pub fn new(name: &str, priority: i32, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            priority,
            feasible: true,
            run_error: None,
            run_panics: false,
            cleanup_errors: Vec::new(),
            log: log.clone(),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn feasible(mut self, feasible: bool) -> Self {
        self.feasible = feasible;
        self
    }

    pub fn run_error(mut self, message: &str) -> Self {
        self.run_error = Some(message.to_string());
        self
    }

    pub fn run_panics(mut self) -> Self {
        self.run_panics = true;
        self
    }

    /// Each message becomes one failed release during cleanup.
    pub fn cleanup_errors(mut self, messages: &[&str]) -> Self {
        self.cleanup_errors = messages.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn into_arc(self) -> Arc<dyn Strategy> {
        Arc::new(self)
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn can_do(&self, _task: &Task) -> bool {
        self.log.record("can_do", &self.name);
        self.feasible
    }

    async fn run(&self, _task: &Task) -> Result<()> {
        self.log.record("run", &self.name);
        let previous = self.runs.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            return Err(anyhow!("MockStrategy {}: run called {} times", self.name, previous + 1));
        }
        if self.run_panics {
            panic!("MockStrategy {} blew up", self.name);
        }
        match &self.run_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    async fn cleanup(&self, _task: &Task) -> Result<()> {
        self.log.record("cleanup", &self.name);
        let mut errors = ErrorList::new();
        for message in &self.cleanup_errors {
            errors.push(anyhow!("{message}"));
        }
        errors.into_result()
    }
}
