use claude_code::{
    ClaudeStreamJsonEvent, ClaudeStreamJsonParser, ContentBlock, StreamJsonErrorCode,
    StreamJsonParseError,
};
use serde_json::Value;

use crate::error::AdapterErrorCode;
use crate::line_parser::{ClassifiedParserError, LineInput, LineParser};
use crate::normalized::{
    FailureKind, NormalizedEvent, NormalizedEvents, TurnFailure, TurnUsage,
};
use crate::normalizer::NormalizerState;

const UNKNOWN_TOOL_NAME: &str = "unknown";

#[derive(Debug, Clone, Default)]
pub struct ClaudeCodeLineParser {
    parser: ClaudeStreamJsonParser,
}

impl ClaudeCodeLineParser {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{redacted}")]
pub struct ClaudeCodeLineParserError {
    code: AdapterErrorCode,
    redacted: String,
    details: String,
}

impl ClassifiedParserError for ClaudeCodeLineParserError {
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

impl LineParser for ClaudeCodeLineParser {
    type Event = ClaudeStreamJsonEvent;
    type Error = ClaudeCodeLineParserError;

    fn parse_line(&mut self, input: LineInput<'_>) -> Result<Option<Self::Event>, Self::Error> {
        let parsed = match input.json {
            Some(value) => self.parser.parse_value(value.clone()).map(Some),
            None => self.parser.parse_line(input.line),
        };
        parsed.map_err(claude_err)
    }
}

fn claude_err(err: StreamJsonParseError) -> ClaudeCodeLineParserError {
    ClaudeCodeLineParserError {
        code: map_code(err.code),
        redacted: err.message.clone(),
        details: err.details,
    }
}

fn map_code(code: StreamJsonErrorCode) -> AdapterErrorCode {
    match code {
        StreamJsonErrorCode::JsonParse => AdapterErrorCode::JsonParse,
        StreamJsonErrorCode::TypedParse => AdapterErrorCode::TypedParse,
        StreamJsonErrorCode::Normalize => AdapterErrorCode::Normalize,
        StreamJsonErrorCode::Unknown => AdapterErrorCode::Unknown,
    }
}

pub(crate) fn normalize_claude_code_event(
    state: &mut NormalizerState,
    event: ClaudeStreamJsonEvent,
) -> NormalizedEvents {
    let mut out = NormalizedEvents::default();
    match event {
        ClaudeStreamJsonEvent::SystemInit { session_id, .. } => {
            out.extend(state.capture_resume(&session_id));
        }
        ClaudeStreamJsonEvent::AssistantMessage { message, .. } => {
            for block in message.content {
                match block {
                    ContentBlock::Text { text } if !text.is_empty() => {
                        out.push(NormalizedEvent::TextChunk { text });
                    }
                    ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                        out.push(NormalizedEvent::ThinkingChunk { text: thinking });
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        let id = state.tool_id(&id);
                        out.push(state.start_tool(id, name, input));
                    }
                    _ => {}
                }
            }
        }
        ClaudeStreamJsonEvent::UserMessage { message, .. } => {
            for block in message.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } = block
                {
                    let id = state.tool_id(&tool_use_id);
                    out.push(state.complete_tool(
                        id,
                        UNKNOWN_TOOL_NAME,
                        flatten_tool_result(content),
                        is_error,
                    ));
                }
            }
        }
        ClaudeStreamJsonEvent::ResultSuccess { result, .. } => {
            if let Some(session_id) = result.session_id.as_deref() {
                out.extend(state.capture_resume(session_id));
            }
            let usage = result.usage.unwrap_or_default();
            out.push(NormalizedEvent::TurnUsage(TurnUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                cached_input_tokens: usage.cache_read_input_tokens,
                cache_creation_input_tokens: usage.cache_creation_input_tokens,
                cost_usd: result.total_cost_usd,
            }));
        }
        ClaudeStreamJsonEvent::ResultError { result, .. } => {
            if let Some(session_id) = result.session_id.as_deref() {
                out.extend(state.capture_resume(session_id));
            }
            out.push(NormalizedEvent::TurnFailed(TurnFailure {
                kind: FailureKind::Reported,
                message: result.error_message(),
                hint: None,
            }));
        }
        ClaudeStreamJsonEvent::SystemOther { .. }
        | ClaudeStreamJsonEvent::StreamEvent { .. }
        | ClaudeStreamJsonEvent::Unknown { .. } => {}
    }
    out
}

/// Tool results arrive as a string or as a list of content blocks; text blocks are joined.
fn flatten_tool_result(content: Value) -> Value {
    let joined = match &content {
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("type").and_then(Value::as_str) {
                Some("text") => item.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Option<Vec<&str>>>()
            .map(|texts| texts.join("\n")),
        _ => None,
    };
    joined.map(Value::String).unwrap_or(content)
}
