use anyhow::{Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::process::{find_on_path, probe_command, run_command};
use super::{Strategy, dest_usable, remove_dir_if_exists};
use crate::consts::{partial_dir_name, work_dir};
use crate::error::ErrorList;
use crate::task::{CancelToken, Task, Volume};

/// Seconds the shared ssh connection stays up after its last user.
const CONTROL_PERSIST_SECS: u32 = 60;

/// rsync over ssh between this machine and one remote host.
pub struct RsyncSsh;

impl RsyncSsh {
    fn control_path(task: &Task) -> PathBuf {
        work_dir(&task.id).join("ssh.sock")
    }

    /// The remote side of the task, if exactly one side is remote.
    fn remote(task: &Task) -> Option<&Volume> {
        match (task.source.is_remote(), task.dest.is_remote()) {
            (true, false) => Some(&task.source),
            (false, true) => Some(&task.dest),
            _ => None,
        }
    }

    /// ssh options shared by every invocation for this task.
    pub(crate) fn ssh_options(task: &Task, multiplex: bool) -> Vec<String> {
        let mut opts = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=5".to_string(),
        ];
        if let Some(port) = task.options.ssh_port {
            opts.push("-p".to_string());
            opts.push(port.to_string());
        }
        if let Some(identity) = &task.options.ssh_identity {
            opts.push("-i".to_string());
            opts.push(identity.display().to_string());
        }
        if multiplex {
            opts.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", Self::control_path(task).display()),
                "-o".to_string(),
                format!("ControlPersist={CONTROL_PERSIST_SECS}"),
            ]);
        }
        opts
    }

    pub(crate) fn rsync_args(task: &Task) -> Vec<String> {
        let ssh = std::iter::once("ssh".to_string())
            .chain(Self::ssh_options(task, true))
            .collect::<Vec<_>>()
            .join(" ");
        let mut args = vec![
            "--archive".to_string(),
            "--human-readable".to_string(),
            "--compress".to_string(),
            format!("--partial-dir={}", partial_dir_name(&task.id)),
            "-e".to_string(),
            ssh,
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

    async fn ssh(task: &Task, target: &str, remote_cmd: &[&str]) -> Result<String> {
        let mut args = Self::ssh_options(task, true);
        args.push(target.to_string());
        args.extend(remote_cmd.iter().map(|s| s.to_string()));
        run_command("ssh", args, task).await
    }
}

#[async_trait]
impl Strategy for RsyncSsh {
    fn name(&self) -> &str {
        "rsync-ssh"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn can_do(&self, task: &Task) -> bool {
        let Some(remote) = Self::remote(task) else {
            return false;
        };

        let local_ok = match (task.source.local_path(), task.dest.local_path()) {
            (Some(source), None) => source.is_dir(),
            (None, Some(dest)) => dest_usable(dest),
            _ => false,
        };
        if !local_ok {
            debug!(strategy = self.name(), "local side not usable");
            return false;
        }

        if find_on_path("rsync").is_none() || find_on_path("ssh").is_none() {
            debug!(strategy = self.name(), "rsync or ssh missing");
            return false;
        }

        let Some(target) = remote.ssh_target() else {
            return false;
        };
        let mut args = Self::ssh_options(task, false);
        args.push(target);
        args.push("true".to_string());
        probe_command("ssh", args, task).await
    }

    async fn run(&self, task: &Task) -> Result<()> {
        let Some(remote) = Self::remote(task) else {
            bail!("rsync-ssh needs exactly one remote side");
        };
        let Some(target) = remote.ssh_target() else {
            bail!("remote volume has no ssh target");
        };

        tokio::fs::create_dir_all(work_dir(&task.id)).await?;

        match &task.dest {
            Volume::Remote { path, .. } => {
                let path = path.display().to_string();
                Self::ssh(task, &target, &["mkdir", "-p", &path]).await?;
            }
            Volume::Local(path) => tokio::fs::create_dir_all(path).await?,
        }

        info!(strategy = self.name(), source = %task.source, dest = %task.dest, "starting rsync over ssh");
        run_command("rsync", Self::rsync_args(task), task).await?;
        Ok(())
    }

    async fn cleanup(&self, task: &Task) -> Result<()> {
        // Releases still have to happen after the job was cancelled.
        let task = &task.clone().with_cancel(CancelToken::never());
        let mut errors = ErrorList::new();
        let target = Self::remote(task).and_then(Volume::ssh_target);

        // Remote releases go first, while the shared connection is still up.
        if let Some(target) = &target {
            if let Volume::Remote { path, .. } = &task.dest {
                let partial = path.join(partial_dir_name(&task.id)).display().to_string();
                errors.check(Self::ssh(task, target, &["rm", "-rf", &partial]).await);
            }
            if Self::control_path(task).exists() {
                let mut args = Self::ssh_options(task, true);
                args.extend(["-O".to_string(), "exit".to_string(), target.clone()]);
                errors.check(run_command("ssh", args, task).await);
            }
        }

        if let Volume::Local(dest) = &task.dest {
            errors.check(remove_dir_if_exists(&dest.join(partial_dir_name(&task.id))).await);
        }
        errors.check(remove_dir_if_exists(&work_dir(&task.id)).await);
        errors.into_result()
    }
}
