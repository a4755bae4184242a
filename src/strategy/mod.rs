pub mod mock;
pub mod native_copy;
pub mod process;
pub mod rsync_local;
pub mod rsync_ssh;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::MigrateError;
use crate::task::Task;

/// One way of moving a volume's data.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable kebab-case identifier, unique within a registry.
    fn name(&self) -> &str;

    /// Smaller is preferred. Must not change over the instance's lifetime.
    fn priority(&self) -> i32;

    /// Read-only check whether `run` can proceed for this task right now.
    /// May be called many times, including for tasks another strategy ends
    /// up handling.
    async fn can_do(&self, task: &Task) -> bool;

    /// Do the migration. Called at most once per job.
    async fn run(&self, task: &Task) -> Result<()>;

    /// Release whatever `run` (or `can_do`) created. Called once after the
    /// strategy was selected, whatever `run` returned. Implementations
    /// attempt every release and report all failures together.
    async fn cleanup(&self, task: &Task) -> Result<()>;
}

/// Names of `strategies`, in the same order.
pub fn names(strategies: &[Arc<dyn Strategy>]) -> Vec<String> {
    strategies.iter().map(|s| s.name().to_string()).collect()
}

/// Strategies by ascending priority. Ties keep their input order.
pub fn rank(strategies: &[Arc<dyn Strategy>]) -> Vec<Arc<dyn Strategy>> {
    let mut ranked = strategies.to_vec();
    ranked.sort_by_key(|s| s.priority());
    ranked
}

/// Remove a scratch directory. A directory that is already gone is fine.
pub(crate) async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Absolute form of `path`, which may not exist yet.
pub(crate) async fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = tokio::fs::canonicalize(path).await {
        return Some(resolved);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some(tokio::fs::canonicalize(parent).await.ok()?.join(name))
}

/// The source is a directory, the destination is usable, and neither one
/// contains the other.
pub(crate) async fn local_dirs_usable(source: &Path, dest: &Path) -> bool {
    if !source.is_dir() || !dest_usable(dest) {
        return false;
    }
    let (Some(source), Some(dest)) = (resolve(source).await, resolve(dest).await) else {
        return false;
    };
    if source.starts_with(&dest) || dest.starts_with(&source) {
        debug!(source = %source.display(), dest = %dest.display(), "source and destination overlap");
        return false;
    }
    true
}

/// The destination is a directory, or can be created as one inside an
/// existing directory.
pub(crate) fn dest_usable(dest: &Path) -> bool {
    if dest.exists() {
        return dest.is_dir();
    }
    match dest.parent() {
        Some(parent) if parent.as_os_str().is_empty() => true,
        Some(parent) => parent.is_dir(),
        None => false,
    }
}

pub fn is_kebab_case(name: &str) -> bool {
    !name.is_empty()
        && name.split('-').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

/// Result of probing a single strategy, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub name: String,
    pub priority: i32,
    pub feasible: bool,
}

/// Ordered set of strategies the caller assembles before a run.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &names(&self.strategies))
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The strategies that ship with pvshift.
    pub fn builtin() -> Self {
        Self {
            strategies: vec![
                Arc::new(rsync_local::RsyncLocal),
                Arc::new(rsync_ssh::RsyncSsh),
                Arc::new(native_copy::NativeCopy),
            ],
        }
    }

    /// Append a strategy. Rejects names that are taken or not kebab-case.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<(), MigrateError> {
        let name = strategy.name();
        if !is_kebab_case(name) {
            return Err(MigrateError::InvalidStrategyName(name.to_string()));
        }
        if self.get(name).is_some() {
            return Err(MigrateError::DuplicateStrategy(name.to_string()));
        }
        self.strategies.push(strategy);
        Ok(())
    }

    pub fn strategies(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }

    pub fn names(&self) -> Vec<String> {
        names(&self.strategies)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Keep only the named strategies, in registry order.
    pub fn only(&self, wanted: &[String]) -> Result<Self, MigrateError> {
        if let Some(unknown) = wanted.iter().find(|name| self.get(name).is_none()) {
            return Err(MigrateError::UnknownStrategy(unknown.clone()));
        }
        Ok(Self {
            strategies: self
                .strategies
                .iter()
                .filter(|s| wanted.iter().any(|w| w == s.name()))
                .cloned()
                .collect(),
        })
    }

    /// Drop the named strategies. Names not in the registry are ignored.
    pub fn without(&self, unwanted: &[String]) -> Self {
        Self {
            strategies: self
                .strategies
                .iter()
                .filter(|s| !unwanted.iter().any(|u| u == s.name()))
                .cloned()
                .collect(),
        }
    }

    /// Probe every strategy at once and report in ranked order.
    pub async fn probe_all(&self, task: &Task) -> Vec<Probe> {
        let ranked = rank(&self.strategies);
        let probes = ranked.iter().map(|s| async move {
            Probe {
                name: s.name().to_string(),
                priority: s.priority(),
                feasible: s.can_do(task).await,
            }
        });
        futures::future::join_all(probes).await
    }
}
