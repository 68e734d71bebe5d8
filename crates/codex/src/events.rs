use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single JSONL event emitted by `codex exec --json`.
///
/// Each stdout line maps to a [`ThreadEvent`] with lifecycle edges:
/// - `thread.started` is emitted once per invocation and carries the resumable thread id.
/// - `turn.started` begins the turn associated with the provided prompt.
/// - one or more `item.*` events stream output and tool activity.
/// - `turn.completed` or `turn.failed` closes the stream; `error` captures transport-level failures.
///
/// Unknown event types deserialize to [`ThreadEvent::Unknown`] and unknown fields are
/// preserved in `extra` maps to keep the parser forward-compatible.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted(ThreadStarted),
    #[serde(rename = "turn.started")]
    TurnStarted(TurnStarted),
    #[serde(rename = "turn.completed")]
    TurnCompleted(TurnCompleted),
    #[serde(rename = "turn.failed")]
    TurnFailed(TurnFailed),
    #[serde(rename = "item.started")]
    ItemStarted(ItemEvent),
    #[serde(rename = "item.updated")]
    ItemUpdated(ItemEvent),
    #[serde(rename = "item.completed")]
    ItemCompleted(ItemEvent),
    #[serde(rename = "error")]
    Error(EventError),
    #[serde(other)]
    Unknown,
}

/// Marks the start of a new thread.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ThreadStarted {
    pub thread_id: String,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Indicates the CLI accepted a new turn within a thread.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TurnStarted {
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Reports a completed turn.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TurnCompleted {
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Token counters reported with `turn.completed`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Indicates a turn-level failure.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TurnFailed {
    pub error: EventError,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Error payload. Accepts both `{"message": ...}` objects and bare strings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(from = "RawEventError")]
pub struct EventError {
    pub message: String,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEventError {
    Text(String),
    Object {
        #[serde(default)]
        message: String,
        #[serde(flatten, default)]
        extra: BTreeMap<String, Value>,
    },
}

impl From<RawEventError> for EventError {
    fn from(raw: RawEventError) -> Self {
        match raw {
            RawEventError::Text(message) => Self {
                message,
                extra: BTreeMap::new(),
            },
            RawEventError::Object { message, extra } => Self { message, extra },
        }
    }
}

/// Wrapper for `item.started` / `item.updated` / `item.completed`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ItemEvent {
    pub item: ThreadItem,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Item payload keyed by the upstream `type` field.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadItem {
    AgentMessage(TextItem),
    Reasoning(TextItem),
    CommandExecution(CommandExecutionItem),
    FileChange(FileChangeItem),
    McpToolCall(McpToolCallItem),
    WebSearch(WebSearchItem),
    TodoList(TodoListItem),
    Error(ErrorItem),
    #[serde(other)]
    Unknown,
}

impl ThreadItem {
    /// Upstream item id; empty when the CLI omitted it or the kind is unknown.
    pub fn id(&self) -> &str {
        match self {
            ThreadItem::AgentMessage(item) | ThreadItem::Reasoning(item) => &item.id,
            ThreadItem::CommandExecution(item) => &item.id,
            ThreadItem::FileChange(item) => &item.id,
            ThreadItem::McpToolCall(item) => &item.id,
            ThreadItem::WebSearch(item) => &item.id,
            ThreadItem::TodoList(item) => &item.id,
            ThreadItem::Error(item) => &item.id,
            ThreadItem::Unknown => "",
        }
    }
}

/// Human-readable content emitted by the agent (messages and reasoning summaries).
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TextItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Snapshot of a command execution, including accumulated output.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CommandExecutionItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub aggregated_output: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// File changes applied by the agent.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FileChangeItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub changes: Vec<FileUpdateChange>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FileUpdateChange {
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// State of an MCP tool call.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct McpToolCallItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, alias = "output")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<EventError>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Details of a web search step.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct WebSearchItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub query: String,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Checklist maintained by the agent.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TodoListItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Non-fatal error surfaced as an item.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ErrorItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

/// Item status supplied by the CLI for bookkeeping.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Declined,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_failed_accepts_string_and_object_errors() {
        let bare: ThreadEvent =
            serde_json::from_value(json!({"type": "turn.failed", "error": "killed"})).unwrap();
        let object: ThreadEvent = serde_json::from_value(json!({
            "type": "turn.failed",
            "error": {"message": "killed", "code": 137}
        }))
        .unwrap();

        match (bare, object) {
            (ThreadEvent::TurnFailed(a), ThreadEvent::TurnFailed(b)) => {
                assert_eq!(a.error.message, "killed");
                assert_eq!(b.error.message, "killed");
                assert_eq!(b.error.extra["code"], 137);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_and_item_kinds_are_tolerated() {
        let event: ThreadEvent =
            serde_json::from_value(json!({"type": "session.configured", "model": "x"})).unwrap();
        assert_eq!(event, ThreadEvent::Unknown);

        let event: ThreadEvent = serde_json::from_value(json!({
            "type": "item.started",
            "item": {"id": "item_9", "type": "image_view", "path": "/tmp/a.png"}
        }))
        .unwrap();
        match event {
            ThreadEvent::ItemStarted(env) => {
                assert_eq!(env.item, ThreadItem::Unknown);
                assert_eq!(env.item.id(), "");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn mcp_tool_call_reads_output_alias() {
        let event: ThreadEvent = serde_json::from_value(json!({
            "type": "item.completed",
            "item": {
                "id": "item_3",
                "type": "mcp_tool_call",
                "server": "files",
                "tool": "list",
                "arguments": {"dir": "."},
                "output": "a.rs\nb.rs",
                "status": "completed"
            }
        }))
        .unwrap();
        let ThreadEvent::ItemCompleted(env) = event else {
            panic!("expected item.completed");
        };
        let ThreadItem::McpToolCall(call) = env.item else {
            panic!("expected mcp_tool_call");
        };
        assert_eq!(call.server, "files");
        assert_eq!(call.result, Some(json!("a.rs\nb.rs")));
        assert_eq!(call.status, ItemStatus::Completed);
    }
}
