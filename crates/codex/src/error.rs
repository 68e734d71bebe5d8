use thiserror::Error;

/// Invalid combinations rejected while building `codex exec` arguments.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ArgsError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("model must not be empty when provided")]
    EmptyModel,
    #[error("resume thread id must not be empty")]
    EmptyThreadId,
}

/// Errors raised while parsing a single `--json` line.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("failed to parse codex JSONL event: {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("codex JSONL event missing `type`")]
    MissingType { line: String },
    #[error("codex `{event_type}` event has an unexpected shape: {source}")]
    Shape {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}
