use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pvshift::banner::{
    BannerInfo, history_text, interrupted_text, print_banner, print_outcome, probes_text,
};
use pvshift::config::{Config, Settings};
use pvshift::consts::{DEFAULT_HISTORY_LIMIT, default_db_path};
use pvshift::engine::Engine;
use pvshift::engine::sequential::SequentialEngine;
use pvshift::error::MigrateError;
use pvshift::events::{Event, EventBus};
use pvshift::history::sqlite::SqliteHistory;
use pvshift::history::{History, RunRecord};
use pvshift::spinner::Spinner;
use pvshift::strategy::{StrategyRegistry, names, rank};
use pvshift::task::{Task, TaskOptions, Volume, cancel_pair};

#[derive(Parser)]
#[command(
    name = "pvshift",
    version,
    about = "Move a volume's data with the first migration strategy that fits."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database for run history and config (use :memory: for ephemeral)
    #[arg(short, long, global = true)]
    db: Option<String>,

    /// More log output: -v for info, -vv for debug. RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Copy SOURCE into DEST with the best feasible strategy
    Migrate(MigrateArgs),
    /// List strategies in preference order, optionally probing a job
    Strategies {
        /// Check which strategies could handle SOURCE -> DEST
        #[arg(long, num_args = 2, value_names = ["SOURCE", "DEST"])]
        probe: Option<Vec<String>>,
    },
    /// Show past runs
    History {
        /// How many runs to show
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,

        /// Forget all recorded runs
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
    /// Read or change stored defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct MigrateArgs {
    /// Local directory or [user@]host:path
    source: String,

    /// Local directory or [user@]host:path
    dest: String,

    /// Delete destination files that are not in the source
    #[arg(long, default_value_t = false)]
    delete: bool,

    /// Do not preserve file owner and group
    #[arg(long, default_value_t = false)]
    no_owner: bool,

    /// Only consider these strategies (repeatable); overrides disabled ones
    #[arg(short, long = "strategy", value_name = "NAME")]
    strategies: Vec<String>,

    /// ssh port for remote volumes
    #[arg(long)]
    ssh_port: Option<u16>,

    /// ssh identity file for remote volumes
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Timeout in seconds for each external command
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Print the run record as JSON instead of progress output
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a stored value
    Get { key: String },
    /// Store a value
    Set { key: String, value: String },
    /// Remove a stored value
    Unset { key: String },
    /// Print every stored value
    List,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let db = match cli.db {
        Some(db) => db,
        None => default_db()?,
    };

    match cli.command {
        Command::Migrate(args) => migrate(args, &db).await,
        Command::Strategies { probe } => strategies(probe, &db).await,
        Command::History { limit, clear } => history(limit, clear, &db).await,
        Command::Config { action } => config(action, &db),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,pvshift={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn default_db() -> Result<String> {
    let path = default_db_path().context("cannot determine home directory, pass --db")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(path.to_string_lossy().into_owned())
}

/// Builtin strategies narrowed by `--strategy` flags, or by the disabled
/// list from config when no flags were given.
fn candidates(requested: &[String], settings: &Settings) -> Result<StrategyRegistry, MigrateError> {
    let registry = StrategyRegistry::builtin();
    if requested.is_empty() {
        Ok(registry.without(&settings.disabled_strategies))
    } else {
        registry.only(requested)
    }
}

async fn migrate(args: MigrateArgs, db: &str) -> Result<ExitCode> {
    let settings = Config::open(db)?.settings()?;
    let history = SqliteHistory::open(db)?;

    let options = TaskOptions {
        delete_extraneous: args.delete,
        preserve_owner: !args.no_owner,
        ssh_port: args.ssh_port.or(settings.ssh_port),
        ssh_identity: args.identity.or(settings.ssh_identity.clone()),
        timeout: args.timeout.map(Duration::from_secs).or(settings.timeout),
    };
    let (cancel, token) = cancel_pair();
    let task = Task::new(Volume::parse(&args.source)?, Volume::parse(&args.dest)?, options)
        .with_cancel(token);

    let registry = candidates(&args.strategies, &settings)?;
    let ranked = names(&rank(registry.strategies()));

    if !args.json {
        print_banner(&BannerInfo {
            task_id: &task.id,
            source: &args.source,
            dest: &args.dest,
            candidates: &ranked,
        });
    }

    let events = Arc::new(EventBus::default());
    let listener = (!args.json).then(|| tokio::spawn(report_progress(events.subscribe())));
    let engine = SequentialEngine::with_events(Arc::clone(&events));

    // Ctrl+C cancels the task instead of dropping the engine, so the
    // selected strategy still gets to clean up.
    let outcome = {
        let run = engine.execute(&task, registry.strategies());
        tokio::pin!(run);
        let mut interrupted = false;
        loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    eprintln!("\ninterrupted, stopping and cleaning up...");
                    interrupted = true;
                    cancel.cancel();
                }
            }
        }
    };

    drop(engine);
    drop(events);
    if let Some(listener) = listener {
        let _ = listener.await;
    }

    let record = RunRecord::from_outcome(&task, &outcome);
    if let Err(e) = history.store(record.clone()).await {
        warn!(error = %e, "failed to record run");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else if record.interrupted {
        println!("{}", interrupted_text(&outcome));
    } else {
        print_outcome(&outcome);
    }

    Ok(if record.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print engine progress until the bus closes.
async fn report_progress(mut rx: broadcast::Receiver<Event>) {
    let mut spinner: Option<Spinner> = None;
    loop {
        match rx.recv().await {
            Ok(Event::Probing { .. }) | Ok(Event::NoneFeasible { .. }) => {}
            Ok(Event::Rejected { strategy }) => println!("  ✗ {strategy} not feasible"),
            Ok(Event::Selected { strategy }) => {
                println!("  ✓ {strategy} selected");
                spinner = Some(Spinner::start(&format!("migrating with {strategy}")));
            }
            Ok(Event::RunFinished { strategy, .. }) => {
                if let Some(spinner) = &spinner {
                    spinner.relabel(&format!("cleaning up after {strategy}"));
                }
            }
            Ok(Event::CleanupFinished { .. }) => {
                if let Some(spinner) = spinner.take() {
                    spinner.stop().await;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    if let Some(spinner) = spinner {
        spinner.stop().await;
    }
}

async fn strategies(probe: Option<Vec<String>>, db: &str) -> Result<ExitCode> {
    let settings = Config::open(db)?.settings()?;
    let registry = StrategyRegistry::builtin();

    let Some(pair) = probe else {
        for strategy in rank(registry.strategies()) {
            let disabled = settings
                .disabled_strategies
                .iter()
                .any(|d| d == strategy.name());
            println!(
                "  {:<12} priority {:>3}{}",
                strategy.name(),
                strategy.priority(),
                if disabled { "  (disabled)" } else { "" }
            );
        }
        return Ok(ExitCode::SUCCESS);
    };

    let [source, dest] = pair.as_slice() else {
        anyhow::bail!("--probe takes SOURCE and DEST");
    };
    let options = TaskOptions {
        ssh_port: settings.ssh_port,
        ssh_identity: settings.ssh_identity.clone(),
        timeout: settings.timeout,
        ..TaskOptions::default()
    };
    let task = Task::new(Volume::parse(source)?, Volume::parse(dest)?, options);

    let spinner = Spinner::start("probing strategies");
    let probes = registry
        .without(&settings.disabled_strategies)
        .probe_all(&task)
        .await;
    spinner.stop().await;

    println!("{}", probes_text(&probes));
    Ok(if probes.iter().any(|p| p.feasible) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn history(limit: usize, clear: bool, db: &str) -> Result<ExitCode> {
    let history = SqliteHistory::open(db)?;
    if clear {
        history.clear().await?;
        println!("history cleared");
    } else {
        println!("{}", history_text(&history.recent(limit).await?));
    }
    Ok(ExitCode::SUCCESS)
}

fn config(action: ConfigAction, db: &str) -> Result<ExitCode> {
    let config = Config::open(db)?;
    match action {
        ConfigAction::Get { key } => match config.get(&key)? {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            config.remove(&key)?;
            println!("{key} unset");
        }
        ConfigAction::List => {
            for (key, value) in config.list()? {
                println!("{key} = {value}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
