//! The migration job handed to every strategy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::MigrateError;

/// One side of a migration: a directory on this machine or on an ssh host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Volume {
    Local(PathBuf),
    Remote {
        user: Option<String>,
        host: String,
        path: PathBuf,
    },
}

impl Volume {
    /// Parse `[user@]host:path` as remote, anything else as a local path.
    ///
    /// A `:` only makes the volume remote when it comes before the first
    /// `/`, so `./a:b` and `/mnt/a:b` stay local.
    pub fn parse(input: &str) -> Result<Self, MigrateError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MigrateError::invalid_volume(input, "empty"));
        }

        let colon = trimmed.find(':');
        let slash = trimmed.find('/');
        let remote_split = match (colon, slash) {
            (Some(c), Some(s)) => c < s,
            (Some(_), None) => true,
            _ => false,
        };

        if !remote_split {
            return Ok(Volume::Local(PathBuf::from(trimmed)));
        }

        let (authority, path) = trimmed.split_at(colon.unwrap_or_default());
        let path = &path[1..];
        if path.is_empty() {
            return Err(MigrateError::invalid_volume(input, "missing remote path"));
        }

        let (user, host) = match authority.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host),
            Some((_, host)) => (None, host),
            None => (None, authority),
        };
        if host.is_empty() {
            return Err(MigrateError::invalid_volume(input, "missing host"));
        }

        Ok(Volume::Remote {
            user,
            host: host.to_string(),
            path: PathBuf::from(path),
        })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Volume::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        !self.is_local()
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Volume::Local(path) => Some(path),
            Volume::Remote { .. } => None,
        }
    }

    /// `user@host` or `host`, for ssh. `None` for local volumes.
    pub fn ssh_target(&self) -> Option<String> {
        match self {
            Volume::Local(_) => None,
            Volume::Remote {
                user: Some(user),
                host,
                ..
            } => Some(format!("{user}@{host}")),
            Volume::Remote { host, .. } => Some(host.clone()),
        }
    }

    /// Render as an rsync operand. A trailing slash copies the directory's
    /// contents rather than the directory itself.
    pub fn rsync_arg(&self, trailing_slash: bool) -> String {
        let mut rendered = self.to_string();
        if trailing_slash && !rendered.ends_with('/') {
            rendered.push('/');
        }
        rendered
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Volume::Local(path) => write!(f, "{}", path.display()),
            Volume::Remote { path, .. } => {
                let target = self.ssh_target().unwrap_or_default();
                write!(f, "{}:{}", target, path.display())
            }
        }
    }
}

/// Knobs the caller can set on a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    /// Remove destination files that do not exist in the source.
    pub delete_extraneous: bool,
    /// Keep file owner and group (needs privileges on the destination).
    pub preserve_owner: bool,
    pub ssh_port: Option<u16>,
    pub ssh_identity: Option<PathBuf>,
    /// Upper bound for each external command a strategy spawns.
    pub timeout: Option<Duration>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            delete_extraneous: false,
            preserve_owner: true,
            ssh_port: None,
            ssh_identity: None,
            timeout: None,
        }
    }
}

/// Fires a [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellation signal carried by a task. Long-running strategy work should
/// watch it and bail out early.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token whose handle is already gone, so it never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle was dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// A fully resolved migration job. Strategies only read it.
#[derive(Debug, Clone)]
pub struct Task {
    /// Short random id, used to name per-run scratch resources.
    pub id: String,
    pub source: Volume,
    pub dest: Volume,
    pub options: TaskOptions,
    pub cancel: CancelToken,
}

impl Task {
    pub fn new(source: Volume, dest: Volume, options: TaskOptions) -> Self {
        let mut rng = rand::rng();
        let id: u32 = rng.random();
        Self {
            id: format!("{id:08x}"),
            source,
            dest,
            options,
            cancel: CancelToken::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Both sides on this machine.
    pub fn is_local(&self) -> bool {
        self.source.is_local() && self.dest.is_local()
    }
}
