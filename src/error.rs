//! Error taxonomy for migrations and the best-effort error aggregate.
//!
//! Strategies return [`anyhow::Result`] from `run` and `cleanup`. The engine
//! folds those into a [`MigrateError`] once a run is over. Cleanup routines
//! collect every failed release into an [`ErrorList`] instead of stopping at
//! the first one.

use std::fmt;

use thiserror::Error;

/// Everything that can go wrong around strategy selection and execution.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Every candidate's feasibility probe said no.
    #[error("no feasible strategy found (tried: {})", display_names(.attempted))]
    NoFeasibleStrategy { attempted: Vec<String> },

    /// The selected strategy's run failed. Cleanup failures ride along.
    #[error("strategy {strategy} failed: {error:#}{}", cleanup_note(.cleanup))]
    Run {
        strategy: String,
        error: anyhow::Error,
        cleanup: Option<anyhow::Error>,
    },

    /// The data was migrated but some resources could not be released.
    #[error("migration with {strategy} succeeded but cleanup failed: {error:#}")]
    Cleanup {
        strategy: String,
        error: anyhow::Error,
    },

    #[error("duplicate strategy name: {0}")]
    DuplicateStrategy(String),

    #[error("invalid strategy name {0:?}: must be kebab-case")]
    InvalidStrategyName(String),

    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid volume {input:?}: {reason}")]
    InvalidVolume { input: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MigrateError {
    pub fn invalid_volume(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVolume {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

fn display_names(names: &[String]) -> String {
    if names.is_empty() {
        "none registered".to_string()
    } else {
        names.join(", ")
    }
}

fn cleanup_note(cleanup: &Option<anyhow::Error>) -> String {
    match cleanup {
        Some(err) => format!(" (cleanup also failed: {err:#})"),
        None => String::new(),
    }
}

/// Several independent failures reported as one error.
///
/// Cleanup code pushes each failed release and keeps going; at the end
/// [`ErrorList::into_result`] turns the collection into a single error, or
/// `Ok(())` if nothing failed.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<anyhow::Error>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<anyhow::Error>) {
        self.absorb(error.into());
    }

    /// Record the error of `result`, if any, and keep going.
    pub fn check<T>(&mut self, result: anyhow::Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.absorb(e);
                None
            }
        }
    }

    /// Add an error, flattening it if it is itself an `ErrorList`.
    pub fn absorb(&mut self, error: anyhow::Error) {
        match error.downcast::<ErrorList>() {
            Ok(nested) => self.errors.extend(nested.errors),
            Err(other) => self.errors.push(other),
        }
    }

    /// Move every error of `other` into this list.
    pub fn merge(&mut self, other: ErrorList) {
        self.errors.extend(other.errors);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    pub fn into_result(self) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::Error::new(self))
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 {
            "error"
        } else {
            "errors"
        };
        write!(f, "{} {} occurred:", self.errors.len(), noun)?;
        for err in self.iter() {
            write!(f, "\n\t* {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

/// Combine two results, keeping every error from both.
pub fn merge_results(first: anyhow::Result<()>, second: anyhow::Result<()>) -> anyhow::Result<()> {
    let mut errors = ErrorList::new();
    errors.check(first);
    errors.check(second);
    errors.into_result()
}
