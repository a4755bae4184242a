use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::{debug, info};

use super::process::{find_on_path, run_command};
use super::{Strategy, local_dirs_usable, remove_dir_if_exists};
use crate::consts::{partial_dir_name, work_dir};
use crate::error::ErrorList;
use crate::task::Task;

/// rsync between two directories on this machine.
pub struct RsyncLocal;

impl RsyncLocal {
    pub(crate) fn args(task: &Task) -> Vec<String> {
        let log_file = work_dir(&task.id).join("rsync.log");
        let mut args = vec![
            "--archive".to_string(),
            "--human-readable".to_string(),
            format!("--partial-dir={}", partial_dir_name(&task.id)),
            format!("--log-file={}", log_file.display()),
        ];
        if task.options.delete_extraneous {
            args.push("--delete".to_string());
        }
        if !task.options.preserve_owner {
            args.push("--no-owner".to_string());
            args.push("--no-group".to_string());
        }
        args.push(task.source.rsync_arg(true));
        args.push(task.dest.rsync_arg(false));
        args
    }
}

#[async_trait]
impl Strategy for RsyncLocal {
    fn name(&self) -> &str {
        "rsync-local"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn can_do(&self, task: &Task) -> bool {
        let (Some(source), Some(dest)) = (task.source.local_path(), task.dest.local_path()) else {
            return false;
        };
        if !local_dirs_usable(source, dest).await {
            debug!(strategy = self.name(), "source or destination not usable, or they overlap");
            return false;
        }
        find_on_path("rsync").is_some()
    }

    async fn run(&self, task: &Task) -> Result<()> {
        let Some(dest) = task.dest.local_path() else {
            bail!("rsync-local needs a local destination");
        };

        tokio::fs::create_dir_all(work_dir(&task.id))
            .await
            .context("failed to create work dir")?;
        tokio::fs::create_dir_all(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;

        info!(strategy = self.name(), source = %task.source, dest = %task.dest, "starting rsync");
        run_command("rsync", Self::args(task), task).await?;
        Ok(())
    }

    async fn cleanup(&self, task: &Task) -> Result<()> {
        let mut errors = ErrorList::new();
        errors.check(remove_dir_if_exists(&work_dir(&task.id)).await);
        if let Some(dest) = task.dest.local_path() {
            errors.check(remove_dir_if_exists(&dest.join(partial_dir_name(&task.id))).await);
        }
        errors.into_result()
    }
}
