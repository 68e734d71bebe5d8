use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use agent_runs::{
    replay_log, Backend, NewSession, PermissionMode, ReplayMode, RunError, RunnerConfig,
    SessionRouter, SessionUpdate,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Fallback filter variable when `RUST_LOG` is unset.
const LOG_ENV: &str = "AGENT_RUNS_LOG";

#[derive(Debug, Parser)]
#[command(name = "agent-runs")]
#[command(about = "Run Claude Code and Codex CLI sessions as detached, resumable processes")]
struct Cli {
    /// TOML runner config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List sessions.
    Sessions,
    /// Create a session bound to one backend.
    NewSession {
        #[arg(long)]
        backend: Backend,
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = PermissionMode::Plan)]
        mode: PermissionMode,
    },
    /// Send a prompt and stream normalized events as JSON lines.
    Send {
        session_id: String,
        prompt: String,
        /// Fails unless it matches the session's backend.
        #[arg(long)]
        backend: Option<Backend>,
        /// Return once the process is started; `attach` picks it up later.
        #[arg(long)]
        detach: bool,
    },
    /// Print the structured history of a session.
    History { session_id: String },
    /// Replay one run log file.
    Replay {
        log: PathBuf,
        /// Backend for logs without a header.
        #[arg(long)]
        backend: Option<Backend>,
    },
    /// Resume tailing runs that are still marked running.
    Attach,
    /// Terminate a run's process.
    Kill { run_id: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
    #[error("event printer failed: {0}")]
    Printer(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<RunnerConfig, RunError> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default().with_env_overrides(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Replay { log, backend } => {
            let history = replay_log(&log, backend, config.max_line_bytes, ReplayMode::Complete)?;
            print_json(&history)
        }
        Command::Sessions => {
            let (router, _) = open_router(config)?;
            print_json(&router.sessions())
        }
        Command::NewSession {
            backend,
            cwd,
            model,
            mode,
        } => {
            let (router, _) = open_router(config)?;
            let working_dir = std::fs::canonicalize(&cwd).map_err(|source| RunError::Io {
                path: cwd.clone(),
                source,
            })?;
            let session = router.create_session(NewSession {
                backend,
                working_dir,
                model,
                permission_mode: mode,
            })?;
            print_json(&session)
        }
        Command::Send {
            session_id,
            prompt,
            backend,
            detach,
        } => {
            let (router, rx) = open_router(config)?;
            let handle = router.send_message(&session_id, &prompt, backend)?;
            info!(run_id = %handle.run_id, pid = handle.pid, log = %handle.log_path.display(), "run started");
            if detach {
                router.detach(&handle.run_id).await?;
                return print_json(&serde_json::json!({
                    "run_id": handle.run_id,
                    "pid": handle.pid,
                    "log_path": handle.log_path,
                }));
            }
            follow(router, vec![handle.run_id], rx).await
        }
        Command::History { session_id } => {
            let (router, _) = open_router(config)?;
            print_json(&router.load_history(&session_id).await?)
        }
        Command::Attach => {
            let (router, rx) = open_router(config)?;
            let run_ids = router.reattach_live_runs();
            if run_ids.is_empty() {
                info!("no running runs to attach to");
            }
            follow(router, run_ids, rx).await
        }
        Command::Kill { run_id } => {
            let (router, _) = open_router(config)?;
            router.kill_run(&run_id)?;
            let record = router.wait_for_run(&run_id).await?;
            print_json(&record)
        }
    }
}

fn open_router(
    config: RunnerConfig,
) -> Result<(SessionRouter, mpsc::UnboundedReceiver<SessionUpdate>), RunError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = SessionRouter::open(config, Arc::new(tx))?;
    Ok((router, rx))
}

/// Prints updates until every run finishes. Ctrl-C detaches instead, leaving the processes
/// running for a later `attach`.
async fn follow(
    router: SessionRouter,
    run_ids: Vec<String>,
    rx: mpsc::UnboundedReceiver<SessionUpdate>,
) -> Result<(), CliError> {
    let printer = tokio::spawn(print_updates(rx));

    let waits = async {
        let mut records = Vec::with_capacity(run_ids.len());
        for run_id in &run_ids {
            records.push(router.wait_for_run(run_id).await?);
        }
        Ok::<_, RunError>(records)
    };

    let outcome = tokio::select! {
        records = waits => records.map(Some),
        _ = tokio::signal::ctrl_c() => Ok(None),
    };
    let records = match outcome? {
        Some(records) => records,
        None => {
            router.detach_all().await;
            info!("detached; run `agent-runs attach` to continue");
            Vec::new()
        }
    };

    // Tail tasks hold router clones; once they are done this closes the channel.
    drop(router);
    printer
        .await
        .map_err(|err| CliError::Printer(err.to_string()))??;

    for record in &records {
        print_json(record)?;
    }
    Ok(())
}

async fn print_updates(mut rx: mpsc::UnboundedReceiver<SessionUpdate>) -> Result<(), CliError> {
    while let Some(update) = rx.recv().await {
        let mut out = io::stdout().lock();
        serde_json::to_writer(&mut out, &update)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}
