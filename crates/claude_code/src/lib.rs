#![forbid(unsafe_code)]
//! Claude Code CLI backend focused on the headless `--print` flow.
//!
//! The crate builds `claude --print` argument lists and parses the
//! `--output-format stream-json` protocol line by line. Process management lives with the host.

mod defaults;
mod error;
mod print;
mod stream_json;

pub use defaults::{default_binary_path, CLAUDE_BINARY_ENV};
pub use error::{ArgsError, StreamJsonErrorCode, StreamJsonLineError, StreamJsonParseError};
pub use print::{ClaudeOutputFormat, ClaudePermission, ClaudePrintRequest};
pub use stream_json::{
    parse_stream_json_lines, ClaudeMessage, ClaudeResult, ClaudeStreamJsonEvent,
    ClaudeStreamJsonParser, ClaudeUsage, ContentBlock, StreamJsonLine, StreamJsonLineOutcome,
};
