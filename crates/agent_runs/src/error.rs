use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::backend::Backend;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{backend} CLI not found (looked in: {searched})")]
    Resolution { backend: Backend, searched: String },
    #[error("failed to launch {binary:?}: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("run log {path:?} is not writable: {source}")]
    LogUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid run arguments: {0}")]
    InvalidArguments(String),
    #[error("a {token_backend} resume token cannot resume a {backend} run")]
    ResumeTokenMismatch {
        backend: Backend,
        token_backend: Backend,
    },
    #[error("session {session_id} is bound to {expected}, not {requested}")]
    BackendMismatch {
        session_id: String,
        expected: Backend,
        requested: Backend,
    },
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error("unknown run {0}")]
    UnknownRun(String),
    #[error("session {session_id} already has a live run ({run_id})")]
    SessionBusy { session_id: String, run_id: String },
    #[error("run log {path:?} has no header; pass the backend explicitly")]
    MissingHeader { path: PathBuf },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session store {path:?} is corrupt: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },
    #[error("background task failed: {0}")]
    Join(String),
}

impl RunError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> RunError {
        let path = path.into();
        move |source| RunError::Io { path, source }
    }
}

impl From<codex::ArgsError> for RunError {
    fn from(err: codex::ArgsError) -> Self {
        RunError::InvalidArguments(err.to_string())
    }
}

impl From<claude_code::ArgsError> for RunError {
    fn from(err: claude_code::ArgsError) -> Self {
        RunError::InvalidArguments(err.to_string())
    }
}
