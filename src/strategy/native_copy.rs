use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fs::Permissions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::{Strategy, local_dirs_usable, remove_dir_if_exists};
use crate::consts::staging_dir_name;
use crate::error::ErrorList;
use crate::task::Task;

/// Plain recursive copy with tokio's filesystem API. Slowest of the
/// built-ins, but needs nothing installed.
pub struct NativeCopy;

impl NativeCopy {
    fn staging(dest: &Path, task: &Task) -> PathBuf {
        dest.join(staging_dir_name(&task.id))
    }
}

/// Copy the tree under `src` into `dst`. Returns the number of files copied
/// and each directory's permissions, keyed by path relative to `src`, parents
/// before children.
async fn copy_tree(src: &Path, dst: &Path, task: &Task) -> Result<(u64, Vec<(PathBuf, Permissions)>)> {
    let mut pending = vec![PathBuf::new()];
    let mut dir_perms = Vec::new();
    let mut files = 0;

    while let Some(rel) = pending.pop() {
        let from = src.join(&rel);
        let to = dst.join(&rel);
        fs::create_dir_all(&to)
            .await
            .with_context(|| format!("failed to create {}", to.display()))?;
        dir_perms.push((rel.clone(), fs::metadata(&from).await?.permissions()));

        let mut entries = fs::read_dir(&from)
            .await
            .with_context(|| format!("failed to read {}", from.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if task.cancel.is_cancelled() {
                bail!("native copy cancelled");
            }
            let file_type = entry.file_type().await?;
            let entry_rel = rel.join(entry.file_name());
            let target = dst.join(&entry_rel);
            if file_type.is_dir() {
                pending.push(entry_rel);
            } else if file_type.is_symlink() {
                copy_symlink(&entry.path(), &target).await?;
            } else if file_type.is_file() {
                copy_file(&entry.path(), &target, task).await?;
                files += 1;
            } else {
                bail!("cannot copy special file {}", entry.path().display());
            }
        }
    }

    Ok((files, dir_perms))
}

/// Copy one regular file, giving up as soon as the task is cancelled.
async fn copy_file(src: &Path, dst: &Path, task: &Task) -> Result<()> {
    tokio::select! {
        copied = fs::copy(src, dst) => {
            copied.with_context(|| format!("failed to copy {}", src.display()))?;
        }
        _ = task.cancel.cancelled() => bail!("native copy cancelled"),
    }
    Ok(())
}

#[cfg(unix)]
async fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).await?;
    fs::symlink(&link, dst)
        .await
        .with_context(|| format!("failed to link {}", dst.display()))
}

#[cfg(not(unix))]
async fn copy_symlink(src: &Path, _dst: &Path) -> Result<()> {
    bail!("cannot copy symlink {} on this platform", src.display())
}

/// Move everything in `staged` into `dest`. Directories present on both
/// sides are merged; anything else in `dest` is replaced.
async fn promote(staged: &Path, dest: &Path) -> Result<()> {
    let mut pending = vec![(staged.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            let staged_is_dir = entry.file_type().await?.is_dir();
            match fs::symlink_metadata(&target).await {
                Ok(existing) if existing.is_dir() && staged_is_dir => {
                    pending.push((entry.path(), target));
                    continue;
                }
                Ok(existing) if existing.is_dir() => fs::remove_dir_all(&target).await?,
                Ok(_) => fs::remove_file(&target).await?,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::rename(entry.path(), &target)
                .await
                .with_context(|| format!("failed to move into {}", target.display()))?;
        }
    }
    Ok(())
}

/// Remove whatever is in `dest` but not in `src`.
async fn prune(src: &Path, dest: &Path) -> Result<u64> {
    let mut pending = vec![PathBuf::new()];
    let mut removed = 0;
    while let Some(rel) = pending.pop() {
        let mut entries = fs::read_dir(dest.join(&rel)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_rel = rel.join(entry.file_name());
            let is_dir = entry.file_type().await?.is_dir();
            match fs::symlink_metadata(src.join(&entry_rel)).await {
                Ok(meta) if meta.is_dir() && is_dir => pending.push(entry_rel),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if is_dir {
                        fs::remove_dir_all(entry.path()).await?;
                    } else {
                        fs::remove_file(entry.path()).await?;
                    }
                    removed += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(removed)
}

#[async_trait]
impl Strategy for NativeCopy {
    fn name(&self) -> &str {
        "native-copy"
    }

    fn priority(&self) -> i32 {
        90
    }

    async fn can_do(&self, task: &Task) -> bool {
        let (Some(source), Some(dest)) = (task.source.local_path(), task.dest.local_path()) else {
            return false;
        };
        local_dirs_usable(source, dest).await
    }

    async fn run(&self, task: &Task) -> Result<()> {
        let (Some(source), Some(dest)) = (task.source.local_path(), task.dest.local_path()) else {
            bail!("native-copy needs local source and destination");
        };

        fs::create_dir_all(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let staging = Self::staging(dest, task);
        let (files, dir_perms) = copy_tree(source, &staging, task).await?;
        promote(&staging, dest).await?;
        remove_dir_if_exists(&staging).await?;

        if task.options.delete_extraneous {
            let removed = prune(source, dest).await?;
            debug!(strategy = self.name(), removed, "pruned extraneous entries");
        }

        for (rel, perms) in dir_perms.into_iter().rev() {
            fs::set_permissions(dest.join(&rel), perms).await?;
        }

        info!(strategy = self.name(), files, "copy finished");
        Ok(())
    }

    async fn cleanup(&self, task: &Task) -> Result<()> {
        let mut errors = ErrorList::new();
        if let Some(dest) = task.dest.local_path() {
            errors.check(remove_dir_if_exists(&Self::staging(dest, task)).await);
        }
        errors.into_result()
    }
}
