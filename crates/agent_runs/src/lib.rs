#![forbid(unsafe_code)]
//! Detached, resumable execution of coding-agent CLI runs.
//!
//! A run is one backend process (Claude Code `--print` or `codex exec --json`) started in its own
//! process group with stdin closed and stdout/stderr appended to a run log. The log starts with a
//! `_run_meta` header and is the single source of truth: [`tail_run`] follows it while the
//! process is alive and [`replay_log`] rebuilds the same structured message afterwards.
//!
//! [`SessionRouter`] ties it together: it binds each session to one [`Backend`], persists resume
//! tokens, and re-attaches to runs that survived a restart.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agent_runs::{Backend, NewSession, PermissionMode, RunnerConfig, SessionRouter};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> Result<(), agent_runs::RunError> {
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let router = SessionRouter::open(RunnerConfig::default(), Arc::new(tx))?;
//! let session = router.create_session(NewSession {
//!     backend: Backend::Codex,
//!     working_dir: "/work/repo".into(),
//!     model: None,
//!     permission_mode: PermissionMode::Build,
//! })?;
//!
//! let run = router.send_message(&session.id, "Fix the failing test", None)?;
//! while let Some(update) = rx.recv().await {
//!     println!("{:?}", update.event);
//!     if update.event.is_terminal() {
//!         break;
//!     }
//! }
//! let record = router.wait_for_run(&run.run_id).await?;
//! println!("{:?}", record.status);
//! # Ok(())
//! # }
//! ```

mod args;
mod backend;
mod binary;
mod config;
mod error;
mod replay;
mod router;
mod run_log;
mod session;
mod sink;
mod spawn;
mod summary;
mod tail;

pub use args::{build_args, RunRequest};
pub use backend::{Backend, PermissionMode, ResumeToken};
pub use binary::{BinaryResolver, DefaultBinaryResolver};
pub use config::{BinaryPaths, ClaudeOptions, CodexOptions, RunnerConfig, WebSearch, DATA_DIR_ENV};
pub use error::RunError;
pub use replay::{replay_log, replay_log_async, ReplayMode, RunHistory};
pub use router::{NewSession, RunHandle, SessionRouter};
pub use run_log::{create_run_log, read_header, run_log_path, RunLogHeader};
pub use session::{RunRecord, Session, SessionStore, MAX_RUNS_PER_SESSION};
pub use sink::{NullSink, SessionUpdate, SessionUpdateSink};
pub use spawn::{pid_alive, spawn_detached, DetachedProcess, ProcessProbe};
pub use summary::{RunStatus, RunSummary};
pub use tail::{tail_run, TailEnd, TailOptions, TailTarget};
