use thiserror::Error;

/// Invalid combinations rejected while building `claude --print` arguments.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ArgsError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("model must not be empty when provided")]
    EmptyModel,
    #[error("resume session id must not be empty")]
    EmptySessionId,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StreamJsonErrorCode {
    JsonParse,
    TypedParse,
    Normalize,
    Unknown,
}

/// Per-line failure. `message` is safe to log; `details` may echo line content.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct StreamJsonParseError {
    pub code: StreamJsonErrorCode,
    pub message: String,
    pub details: String,
}

#[derive(Debug, Error, Clone)]
#[error("stream-json line {line_number}: {message}")]
pub struct StreamJsonLineError {
    pub line_number: usize,
    pub message: String,
}
