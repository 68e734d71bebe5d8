use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use run_events::TurnUsage;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::debug;

use crate::backend::{Backend, PermissionMode, ResumeToken};
use crate::summary::RunStatus;
use crate::RunError;

/// Finalized runs kept per session; older records are dropped (their logs stay on disk).
pub const MAX_RUNS_PER_SESSION: usize = 50;

/// A conversation bound to one backend for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub backend: Backend,
    /// Unset until a run captures one.
    #[serde(default)]
    pub resume_token: Option<ResumeToken>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub message_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
}

impl Session {
    pub fn run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|run| run.run_id == run_id)
    }

    pub fn run_mut(&mut self, run_id: &str) -> Option<&mut RunRecord> {
        self.runs.iter_mut().find(|run| run.run_id == run_id)
    }

    pub fn running(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs
            .iter()
            .filter(|run| run.status == RunStatus::Running)
    }

    fn trim_runs(&mut self) {
        let finalized = self.runs.iter().filter(|run| run.status.is_final()).count();
        let mut excess = finalized.saturating_sub(MAX_RUNS_PER_SESSION);
        self.runs.retain(|run| {
            if excess > 0 && run.status.is_final() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// One process execution within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub pid: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub log_path: PathBuf,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TurnUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Log bytes already delivered to the sink; a re-attached tail starts here.
    #[serde(default)]
    pub tail_offset: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    sessions: BTreeMap<String, Session>,
}

/// Sessions and their runs, persisted as one JSON file.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    data: StoreFile,
}

impl SessionStore {
    /// Loads `path`, or starts empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RunError> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| RunError::Store {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoreFile::default(),
            Err(err) => return Err(RunError::io(&path)(err)),
        };
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a temp file beside the store, then renames over it.
    pub fn save(&mut self) -> Result<(), RunError> {
        for session in self.data.sessions.values_mut() {
            session.trim_runs();
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(RunError::io(&dir))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(RunError::io(&dir))?;
        serde_json::to_writer_pretty(&mut tmp, &self.data).map_err(|source| RunError::Store {
            path: self.path.clone(),
            source,
        })?;
        tmp.write_all(b"\n").map_err(RunError::io(tmp.path()))?;
        tmp.as_file().sync_all().map_err(RunError::io(tmp.path()))?;
        tmp.persist(&self.path)
            .map_err(|err| RunError::io(&self.path)(err.error))?;

        debug!(path = %self.path.display(), sessions = self.data.sessions.len(), "session store saved");
        Ok(())
    }

    pub fn insert(&mut self, session: Session) {
        self.data.sessions.insert(session.id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.data.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.data.sessions.get_mut(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.data.sessions.values()
    }

    /// The session owning `run_id`.
    pub fn session_of_run(&self, run_id: &str) -> Option<&Session> {
        self.sessions().find(|session| session.run(run_id).is_some())
    }

    pub fn session_of_run_mut(&mut self, run_id: &str) -> Option<&mut Session> {
        self.data
            .sessions
            .values_mut()
            .find(|session| session.run(run_id).is_some())
    }
}
