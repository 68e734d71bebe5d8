//! The run log: one `_run_meta` header line, then the backend's native JSONL verbatim.
//!
//! The backend process appends to the file directly (stdout and stderr both point at it), so the
//! log is the only persisted artifact of a run. Everything structured is derived from it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::backend::{Backend, PermissionMode};
use crate::RunError;

const LOG_EXTENSION: &str = "jsonl";

/// Metadata written as the first line of every run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogHeader {
    #[serde(rename = "_run_meta")]
    pub run_meta: bool,
    pub session_id: String,
    pub run_id: String,
    pub backend: Backend,
    pub permission_mode: PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub working_dir: PathBuf,
    pub prompt: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

impl RunLogHeader {
    pub fn new(
        session_id: impl Into<String>,
        run_id: impl Into<String>,
        backend: Backend,
        permission_mode: PermissionMode,
        model: Option<String>,
        working_dir: impl Into<PathBuf>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            run_meta: true,
            session_id: session_id.into(),
            run_id: run_id.into(),
            backend,
            permission_mode,
            model,
            working_dir: working_dir.into(),
            prompt: prompt.into(),
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Reads a header back from the value captured by the line decoder.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// `<runs_dir>/<session_id>/<run_id>.jsonl`
pub fn run_log_path(runs_dir: &Path, session_id: &str, run_id: &str) -> PathBuf {
    runs_dir
        .join(session_id)
        .join(format!("{run_id}.{LOG_EXTENSION}"))
}

/// Creates a fresh log at `path`, writes the header line and returns the file in append mode,
/// ready to be handed to the spawned process.
pub fn create_run_log(path: &Path, header: &RunLogHeader) -> Result<File, RunError> {
    let unwritable = |source| RunError::LogUnwritable {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(unwritable)?;
    }
    let mut file = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(path)
        .map_err(unwritable)?;

    let mut line = serde_json::to_vec(header).map_err(|err| unwritable(err.into()))?;
    line.push(b'\n');
    file.write_all(&line).map_err(unwritable)?;
    file.flush().map_err(unwritable)?;

    debug!(path = %path.display(), run_id = %header.run_id, "run log created");
    Ok(file)
}

/// Reads the header of an existing log, if its first line is one.
///
/// Only the first `max_line_bytes` bytes are examined.
pub fn read_header(path: &Path, max_line_bytes: usize) -> Result<Option<RunLogHeader>, RunError> {
    let file = File::open(path).map_err(RunError::io(path))?;
    let mut first = Vec::new();
    BufReader::new(file)
        .take(max_line_bytes as u64 + 1)
        .read_until(b'\n', &mut first)
        .map_err(RunError::io(path))?;

    let Ok(value) = serde_json::from_slice::<Value>(&first) else {
        return Ok(None);
    };
    if value.get(run_events::RUN_META_KEY).is_none() {
        return Ok(None);
    }
    Ok(RunLogHeader::from_value(&value))
}
