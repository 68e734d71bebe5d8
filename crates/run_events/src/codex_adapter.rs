use codex::{
    auth_failure_hint, EventParseError, ItemStatus, JsonlThreadEventParser, ThreadEvent,
    ThreadItem,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AdapterErrorCode;
use crate::line_parser::{ClassifiedParserError, LineInput, LineParser};
use crate::normalized::{
    FailureKind, NormalizedEvent, NormalizedEvents, TurnFailure, TurnUsage,
};
use crate::normalizer::NormalizerState;

pub const BASH_TOOL_NAME: &str = "Bash";
pub const FILE_CHANGE_TOOL_NAME: &str = "FileChange";

#[derive(Debug, Clone, Default)]
pub struct CodexLineParser {
    parser: JsonlThreadEventParser,
}

impl CodexLineParser {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{redacted}")]
pub struct CodexLineParserError {
    code: AdapterErrorCode,
    redacted: String,
    details: String,
}

impl ClassifiedParserError for CodexLineParserError {
    fn code(&self) -> AdapterErrorCode {
        self.code
    }

    fn redacted_summary(&self) -> String {
        self.redacted.clone()
    }

    fn full_details(&self) -> String {
        self.details.clone()
    }
}

impl LineParser for CodexLineParser {
    type Event = ThreadEvent;
    type Error = CodexLineParserError;

    fn parse_line(&mut self, input: LineInput<'_>) -> Result<Option<Self::Event>, Self::Error> {
        let parsed = match input.json {
            Some(value) => self.parser.parse_value(value.clone(), input.line).map(Some),
            None => self.parser.parse_line(input.line),
        };
        parsed.map_err(codex_err)
    }
}

fn codex_err(err: EventParseError) -> CodexLineParserError {
    let (code, redacted) = match &err {
        EventParseError::Parse { source, .. } => (
            AdapterErrorCode::JsonParse,
            format!("parse error: {source}"),
        ),
        EventParseError::MissingType { .. } => (
            AdapterErrorCode::TypedParse,
            "event has no `type` field".to_string(),
        ),
        EventParseError::Shape { event_type, .. } => (
            AdapterErrorCode::TypedParse,
            format!("unexpected `{event_type}` shape"),
        ),
    };
    let details = match &err {
        EventParseError::Parse { line, .. } | EventParseError::MissingType { line } => {
            format!("{err}: {line}")
        }
        EventParseError::Shape { .. } => err.to_string(),
    };

    CodexLineParserError {
        code,
        redacted,
        details,
    }
}

pub(crate) fn normalize_codex_event(
    state: &mut NormalizerState,
    event: ThreadEvent,
) -> NormalizedEvents {
    match event {
        ThreadEvent::ThreadStarted(started) => state.capture_resume(&started.thread_id).into(),
        ThreadEvent::TurnStarted(_) | ThreadEvent::ItemUpdated(_) | ThreadEvent::Unknown => {
            NormalizedEvents::default()
        }
        ThreadEvent::TurnCompleted(done) => {
            let usage = done.usage.unwrap_or_default();
            Some(NormalizedEvent::TurnUsage(TurnUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cached_input_tokens: usage.cached_input_tokens,
                cache_creation_input_tokens: 0,
                cost_usd: None,
            }))
            .into()
        }
        ThreadEvent::TurnFailed(failed) => {
            let message = if failed.error.message.trim().is_empty() {
                "codex turn failed".to_string()
            } else {
                failed.error.message
            };
            let hint = auth_failure_hint(&message).map(str::to_string);
            Some(NormalizedEvent::TurnFailed(TurnFailure {
                kind: FailureKind::Reported,
                message,
                hint,
            }))
            .into()
        }
        ThreadEvent::Error(error) => {
            debug!(message = %error.message, "codex stream error event");
            state.remember_error(&error.message);
            NormalizedEvents::default()
        }
        ThreadEvent::ItemStarted(env) => item_started(state, env.item).into(),
        ThreadEvent::ItemCompleted(env) => item_completed(state, env.item).into(),
    }
}

fn item_started(state: &mut NormalizerState, item: ThreadItem) -> Option<NormalizedEvent> {
    match item {
        ThreadItem::CommandExecution(cmd) => {
            let id = state.tool_id(&cmd.id);
            Some(state.start_tool(
                id,
                BASH_TOOL_NAME.to_string(),
                json!({ "command": cmd.command }),
            ))
        }
        ThreadItem::FileChange(change) => {
            let id = state.tool_id(&change.id);
            let changes = serde_json::to_value(&change.changes).unwrap_or_default();
            Some(state.start_tool(
                id,
                FILE_CHANGE_TOOL_NAME.to_string(),
                json!({ "changes": changes }),
            ))
        }
        ThreadItem::McpToolCall(call) => {
            let id = state.tool_id(&call.id);
            let name = mcp_tool_name(&call.server, &call.tool);
            Some(state.start_tool(id, name, call.arguments))
        }
        _ => None,
    }
}

fn item_completed(state: &mut NormalizerState, item: ThreadItem) -> Option<NormalizedEvent> {
    match item {
        ThreadItem::AgentMessage(msg) if !msg.text.is_empty() => {
            Some(NormalizedEvent::TextChunk { text: msg.text })
        }
        ThreadItem::Reasoning(reasoning) if !reasoning.text.is_empty() => {
            Some(NormalizedEvent::ThinkingChunk {
                text: reasoning.text,
            })
        }
        ThreadItem::CommandExecution(cmd) => {
            let id = state.tool_id(&cmd.id);
            let is_error =
                cmd.status == ItemStatus::Failed || cmd.exit_code.is_some_and(|code| code != 0);
            Some(state.complete_tool(
                id,
                BASH_TOOL_NAME,
                Value::String(cmd.aggregated_output),
                is_error,
            ))
        }
        ThreadItem::FileChange(change) => {
            let id = state.tool_id(&change.id);
            let is_error = change.status == ItemStatus::Failed;
            let output = serde_json::to_value(&change.changes).unwrap_or_default();
            Some(state.complete_tool(id, FILE_CHANGE_TOOL_NAME, output, is_error))
        }
        ThreadItem::McpToolCall(call) => {
            let id = state.tool_id(&call.id);
            let name = mcp_tool_name(&call.server, &call.tool);
            let (output, is_error) = match (call.result, call.error) {
                (_, Some(error)) => (Value::String(error.message), true),
                (Some(result), None) => (result, call.status == ItemStatus::Failed),
                (None, None) => (Value::Null, call.status == ItemStatus::Failed),
            };
            Some(state.complete_tool(id, &name, output, is_error))
        }
        ThreadItem::Error(error) => {
            debug!(message = %error.message, "codex error item");
            None
        }
        _ => None,
    }
}

fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("{server}:{tool}")
}
