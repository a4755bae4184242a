use anyhow::{Context, Result, bail};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::task::Task;

/// Maximum output size in bytes. Anything beyond this is truncated.
const MAX_OUTPUT_BYTES: usize = 16_000;

/// Environment variables passed through to child processes. Everything else
/// is stripped.
const SAFE_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "SSH_AUTH_SOCK",
];

/// Locate `program` on `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut end = max_bytes;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated: showing {}/{} bytes]",
        &output[..end],
        end,
        output.len()
    )
}

fn filtered_env() -> Vec<(String, String)> {
    SAFE_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|val| (key.to_string(), val)))
        .collect()
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Run `program` to completion and return its stdout.
///
/// Stops early, killing the child, when the task is cancelled or the task's
/// timeout elapses. A non-zero exit is an error carrying stderr.
pub async fn run_command<I, S>(program: &str, args: I, task: &Task) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    if task.cancel.is_cancelled() {
        bail!("{program}: cancelled before start");
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .env_clear()
        .envs(filtered_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(program, command = ?command.as_std(), "spawning");
    let child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.with_context(|| format!("failed to wait for {program}"))?
        }
        _ = task.cancel.cancelled() => bail!("{program}: cancelled"),
        _ = deadline(task.options.timeout) => {
            bail!("{program}: timed out after {:?}", task.options.timeout.unwrap_or_default())
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        Ok(truncate_output(&stdout, MAX_OUTPUT_BYTES))
    } else {
        bail!(
            "{} exited with code {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            truncate_output(stderr.trim(), MAX_OUTPUT_BYTES)
        )
    }
}

/// Like [`run_command`] but only reports whether it succeeded.
pub async fn probe_command<I, S>(program: &str, args: I, task: &Task) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    match run_command(program, args, task).await {
        Ok(_) => true,
        Err(e) => {
            debug!(program, error = %e, "probe failed");
            false
        }
    }
}
