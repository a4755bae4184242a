//! Human-readable rendering for the CLI: start banner, outcome summary,
//! probe table and run history.

use crate::consts::{AUTHOR, REPO};
use crate::engine::ExecutionOutcome;
use crate::history::HistoryEntry;
use crate::strategy::Probe;

/// What a `migrate` run is about to do.
pub struct BannerInfo<'a> {
    pub task_id: &'a str,
    pub source: &'a str,
    pub dest: &'a str,
    pub candidates: &'a [String],
}

pub fn banner_text(info: &BannerInfo) -> String {
    format!(
        "pvshift {} by {} ({})\n  task        {}\n  source      {}\n  dest        {}\n  candidates  {}\n",
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        REPO,
        info.task_id,
        info.source,
        info.dest,
        if info.candidates.is_empty() {
            "none".to_string()
        } else {
            info.candidates.join(", ")
        },
    )
}

pub fn print_banner(info: &BannerInfo) {
    println!("{}", banner_text(info));
}

pub fn outcome_text(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::NoneFeasible { attempted } => format!(
            "✗ no feasible strategy (tried: {})",
            if attempted.is_empty() {
                "none".to_string()
            } else {
                attempted.join(", ")
            }
        ),
        ExecutionOutcome::Executed {
            strategy,
            run,
            cleanup,
        } => {
            let mut lines = Vec::new();
            match run {
                Ok(()) => lines.push(format!("✓ migrated with {strategy}")),
                Err(e) => lines.push(format!("✗ {strategy} failed: {e:#}")),
            }
            if let Err(e) = cleanup {
                lines.push(format!("  cleanup failed: {e:#}"));
            }
            lines.join("\n")
        }
    }
}

pub fn print_outcome(outcome: &ExecutionOutcome) {
    println!("{}", outcome_text(outcome));
}

/// Summary for a job cancelled by the user. Probes cut short by the
/// cancel say nothing about feasibility, so they are not reported.
pub fn interrupted_text(outcome: &ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::NoneFeasible { .. } => {
            "✗ interrupted before a strategy was selected".to_string()
        }
        ExecutionOutcome::Executed { .. } => format!("✗ interrupted\n{}", outcome_text(outcome)),
    }
}

pub fn probes_text(probes: &[Probe]) -> String {
    let width = probes.iter().map(|p| p.name.len()).max().unwrap_or(0);
    probes
        .iter()
        .map(|p| {
            let mark = if p.feasible { "✓" } else { "✗" };
            format!("  {mark} {:<width$}  priority {}", p.name, p.priority)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn history_text(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "no runs recorded".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            let r = &entry.record;
            let status = if r.interrupted {
                "int"
            } else if r.succeeded() {
                "ok "
            } else {
                "err"
            };
            let strategy = r.strategy.as_deref().unwrap_or("-");
            format!(
                "{} {} {} {} -> {} [{}]",
                entry.timestamp, status, r.task_id, r.source, r.dest, strategy
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
