#![forbid(unsafe_code)]
//! Codex CLI backend: argv construction and typed parsing for `codex exec --json`.
//!
//! Nothing here spawns processes. Hosts build an argv with [`ExecRequest::argv`], run the
//! binary however they like, and feed stdout lines to [`JsonlThreadEventParser`].
//!
//! ## Streaming events
//! - `thread.started` carries the thread id used by `codex exec resume <thread_id> <prompt>`.
//! - `item.started`/`item.completed` wrap an `item` object whose `type` is one of
//!   `agent_message`, `reasoning`, `command_execution`, `file_change`, `mcp_tool_call`,
//!   `web_search`, `todo_list`, or `error`.
//! - `turn.completed` (with `usage`) or `turn.failed` (with `error`) closes the turn.
//!
//! Unknown event or item kinds parse to `Unknown` variants instead of failing.

mod args;
mod defaults;
mod error;
mod events;
mod hints;
mod jsonl;

pub use args::{ExecRequest, SafetyOverride, WebSearchMode};
pub use defaults::{default_binary_path, CODEX_BINARY_ENV};
pub use error::{ArgsError, EventParseError};
pub use events::{
    CommandExecutionItem, ErrorItem, EventError, FileChangeItem, FileUpdateChange, ItemEvent,
    ItemStatus, McpToolCallItem, TextItem, ThreadEvent, ThreadItem, ThreadStarted, TodoListItem,
    TurnCompleted, TurnFailed, TurnStarted, Usage, WebSearchItem,
};
pub use hints::auth_failure_hint;
pub use jsonl::JsonlThreadEventParser;
