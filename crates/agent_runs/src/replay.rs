use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use run_events::{ChatMessage, IngestConfig, RunStream, SyncBoundedLineReader};
use serde::Serialize;
use tracing::debug;

use crate::backend::Backend;
use crate::run_log::{read_header, RunLogHeader};
use crate::summary::RunSummary;
use crate::RunError;

/// Structured view of one run log: the user turn from the header (when present) and the
/// assistant message folded from the backend's events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunHistory {
    pub header: Option<RunLogHeader>,
    pub messages: Vec<ChatMessage>,
    pub summary: RunSummary,
}

/// How to treat a log that has no terminal event.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReplayMode {
    /// The run is over; a missing terminal event means it was interrupted.
    Complete,
    /// The run may still be writing; the message stays in progress.
    Snapshot,
}

/// Replays a run log.
///
/// The backend comes from the log header, or `fallback` for logs written without one.
pub fn replay_log(
    path: &Path,
    fallback: Option<Backend>,
    max_line_bytes: usize,
    mode: ReplayMode,
) -> Result<RunHistory, RunError> {
    let header = read_header(path, max_line_bytes)?;
    let backend = match (&header, fallback) {
        (Some(header), _) => header.backend,
        (None, Some(backend)) => backend,
        (None, None) => {
            return Err(RunError::MissingHeader {
                path: path.to_path_buf(),
            })
        }
    };

    let file = File::open(path).map_err(RunError::io(path))?;
    let log_offset = file.metadata().map_err(RunError::io(path))?.len();
    let mut stream = RunStream::new(
        backend.agent_kind(),
        IngestConfig::with_max_line_bytes(max_line_bytes),
    );
    let mut lines = 0usize;
    for line in SyncBoundedLineReader::new(BufReader::new(file), max_line_bytes) {
        lines += 1;
        stream.push_line(line);
    }
    if mode == ReplayMode::Complete {
        stream.finish();
    }
    debug!(path = %path.display(), lines, %backend, "replayed run log");

    let summary = RunSummary::from_stream(stream, log_offset);
    let mut messages = Vec::with_capacity(2);
    if let Some(header) = &header {
        messages.push(ChatMessage::user(header.prompt.clone()));
    }
    messages.push(summary.message.clone());

    Ok(RunHistory {
        header,
        messages,
        summary,
    })
}

/// [`replay_log`] on the blocking pool.
pub async fn replay_log_async(
    path: PathBuf,
    fallback: Option<Backend>,
    max_line_bytes: usize,
    mode: ReplayMode,
) -> Result<RunHistory, RunError> {
    tokio::task::spawn_blocking(move || replay_log(&path, fallback, max_line_bytes, mode))
        .await
        .map_err(|err| RunError::Join(err.to_string()))?
}
