#![forbid(unsafe_code)]
//! Backend-agnostic processing of agent CLI run logs.
//!
//! A run log is newline-delimited UTF-8: an optional `_run_meta` header line followed by the
//! backend's native JSON events. This crate provides:
//! - bounded line splitting for both growing and complete files,
//! - per-backend line parsers behind the [`LineParser`] trait,
//! - the [`EventNormalizer`] that maps native events onto [`NormalizedEvent`],
//! - the [`MessageFolder`] that collapses events into a [`ChatMessage`],
//! - [`RunStream`], which chains all of the above for one run.

mod config;
mod decode;
mod error;
mod fold;
mod line_parser;
mod normalized;
mod normalizer;
mod reader;
mod stream;

pub mod claude_code_adapter;
pub mod codex_adapter;

pub use config::{ErrorDetailCapture, IngestConfig, IngestLimits};
pub use decode::{decode_line, DecodedLine};
pub use error::{AdapterErrorCode, ErrorDetail, ErrorDetailSink, LineRecordError};
pub use fold::{ChatMessage, MessageBlock, MessageFolder, MessageOutcome, MessageRole, ToolCall};
pub use line_parser::{ClassifiedParserError, LineInput, LineParser};
pub use normalized::{
    AgentKind, FailureKind, NormalizedEvent, NormalizedEvents, TurnFailure, TurnUsage,
};
pub use normalizer::EventNormalizer;
pub use reader::{BoundedLine, IncrementalLineSplitter, SyncBoundedLineReader};
pub use stream::{RunStream, RUN_META_KEY};
