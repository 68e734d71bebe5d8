use serde_json::Value;

use crate::{EventParseError, ThreadEvent};

/// Parses Codex `--json` JSONL lines into typed [`ThreadEvent`] values.
///
/// This API is synchronous and line-oriented; callers own line splitting.
#[derive(Clone, Debug, Default)]
pub struct JsonlThreadEventParser {
    thread_id: Option<String>,
}

impl JsonlThreadEventParser {
    /// Constructs a new parser with no established thread.
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread id from the first `thread.started` seen by this parser.
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Parses a single logical JSONL line.
    ///
    /// - Returns `Ok(None)` for empty / whitespace-only lines.
    /// - Otherwise returns `Ok(Some(ThreadEvent))` on success.
    /// - Returns `Err(EventParseError)` on JSON parse or typed parse failures.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<ThreadEvent>, EventParseError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.chars().all(|ch| ch.is_whitespace()) {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(line).map_err(|source| EventParseError::Parse {
            line: line.to_string(),
            source,
        })?;
        self.parse_value(value, line).map(Some)
    }

    /// Parses an already-decoded JSON object. `line` is only used for error context.
    pub fn parse_value(&mut self, value: Value, line: &str) -> Result<ThreadEvent, EventParseError> {
        let event_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| EventParseError::MissingType {
                line: line.to_string(),
            })?;

        let event = serde_json::from_value::<ThreadEvent>(value)
            .map_err(|source| EventParseError::Shape { event_type, source })?;

        if let ThreadEvent::ThreadStarted(started) = &event {
            if self.thread_id.is_none() && !started.thread_id.trim().is_empty() {
                self.thread_id = Some(started.thread_id.clone());
            }
        }

        Ok(event)
    }
}
