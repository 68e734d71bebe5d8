use serde::Deserialize;
use serde_json::Value;

use crate::{StreamJsonErrorCode, StreamJsonLineError, StreamJsonParseError};

/// One line of `claude --print --output-format stream-json --verbose` output.
///
/// Variants keep the decoded `raw` object so callers can reach fields this model does not name.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaudeStreamJsonEvent {
    SystemInit {
        session_id: String,
        raw: Value,
    },
    SystemOther {
        subtype: Option<String>,
        raw: Value,
    },
    AssistantMessage {
        message: ClaudeMessage,
        raw: Value,
    },
    UserMessage {
        message: ClaudeMessage,
        raw: Value,
    },
    ResultSuccess {
        result: ClaudeResult,
        raw: Value,
    },
    ResultError {
        result: ClaudeResult,
        raw: Value,
    },
    StreamEvent {
        raw: Value,
    },
    Unknown {
        event_type: Option<String>,
        raw: Value,
    },
}

impl ClaudeStreamJsonEvent {
    pub fn raw(&self) -> &Value {
        match self {
            ClaudeStreamJsonEvent::SystemInit { raw, .. }
            | ClaudeStreamJsonEvent::SystemOther { raw, .. }
            | ClaudeStreamJsonEvent::AssistantMessage { raw, .. }
            | ClaudeStreamJsonEvent::UserMessage { raw, .. }
            | ClaudeStreamJsonEvent::ResultSuccess { raw, .. }
            | ClaudeStreamJsonEvent::ResultError { raw, .. }
            | ClaudeStreamJsonEvent::StreamEvent { raw }
            | ClaudeStreamJsonEvent::Unknown { raw, .. } => raw,
        }
    }
}

/// Message body of an `assistant` / `user` line. String content is lifted into a single text block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClaudeMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "content_blocks")]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

fn content_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawContent {
        Text(String),
        Blocks(Vec<ContentBlock>),
        Null(Option<()>),
    }

    Ok(match RawContent::deserialize(deserializer)? {
        RawContent::Text(text) => vec![ContentBlock::Text { text }],
        RawContent::Blocks(blocks) => blocks,
        RawContent::Null(_) => Vec::new(),
    })
}

/// Final `result` line of a print run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClaudeResult {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<ClaudeUsage>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ClaudeResult {
    /// Best human-readable failure description carried by the line.
    pub fn error_message(&self) -> String {
        if !self.errors.is_empty() {
            return self.errors.join("\n");
        }
        if let Some(result) = self.result.as_deref().filter(|r| !r.trim().is_empty()) {
            return result.to_string();
        }
        match self.subtype.as_deref() {
            Some(subtype) => format!("claude run ended with {subtype}"),
            None => "claude run failed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ClaudeUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeStreamJsonParser {
    session_id: Option<String>,
}

impl ClaudeStreamJsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id from the first `system`/`init` line.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn parse_line(
        &mut self,
        line: &str,
    ) -> Result<Option<ClaudeStreamJsonEvent>, StreamJsonParseError> {
        let line = line.trim_end_matches('\r');
        if line.chars().all(|ch| ch.is_whitespace()) {
            return Ok(None);
        }

        let value = serde_json::from_str::<Value>(line).map_err(|err| StreamJsonParseError {
            code: StreamJsonErrorCode::JsonParse,
            message: "line is not valid JSON".to_string(),
            details: err.to_string(),
        })?;
        self.parse_value(value).map(Some)
    }

    /// Classifies an already-decoded JSON object.
    pub fn parse_value(&mut self, raw: Value) -> Result<ClaudeStreamJsonEvent, StreamJsonParseError> {
        let Some(obj) = raw.as_object() else {
            return Err(StreamJsonParseError {
                code: StreamJsonErrorCode::TypedParse,
                message: "stream-json line is not an object".to_string(),
                details: raw.to_string(),
            });
        };
        let event_type = obj.get("type").and_then(Value::as_str).map(str::to_string);
        let subtype = obj.get("subtype").and_then(Value::as_str).map(str::to_string);

        let event = match event_type.as_deref() {
            Some("system") if subtype.as_deref() == Some("init") => {
                let session_id = obj
                    .get("session_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| StreamJsonParseError {
                        code: StreamJsonErrorCode::Normalize,
                        message: "system init line without session_id".to_string(),
                        details: raw.to_string(),
                    })?
                    .to_string();
                if self.session_id.is_none() {
                    self.session_id = Some(session_id.clone());
                }
                ClaudeStreamJsonEvent::SystemInit { session_id, raw }
            }
            Some("system") => ClaudeStreamJsonEvent::SystemOther { subtype, raw },
            Some("assistant") => ClaudeStreamJsonEvent::AssistantMessage {
                message: message_of(&raw)?,
                raw,
            },
            Some("user") => ClaudeStreamJsonEvent::UserMessage {
                message: message_of(&raw)?,
                raw,
            },
            Some("result") => {
                let result = ClaudeResult::deserialize(&raw).map_err(|err| typed_err("result", err))?;
                let failed = result.is_error
                    || result
                        .subtype
                        .as_deref()
                        .is_some_and(|s| s.starts_with("error"));
                if failed {
                    ClaudeStreamJsonEvent::ResultError { result, raw }
                } else {
                    ClaudeStreamJsonEvent::ResultSuccess { result, raw }
                }
            }
            Some("stream_event") => ClaudeStreamJsonEvent::StreamEvent { raw },
            _ => ClaudeStreamJsonEvent::Unknown { event_type, raw },
        };
        Ok(event)
    }
}

fn message_of(raw: &Value) -> Result<ClaudeMessage, StreamJsonParseError> {
    match raw.get("message") {
        Some(message) => {
            ClaudeMessage::deserialize(message).map_err(|err| typed_err("message", err))
        }
        None => Ok(ClaudeMessage::default()),
    }
}

fn typed_err(what: &str, err: serde_json::Error) -> StreamJsonParseError {
    StreamJsonParseError {
        code: StreamJsonErrorCode::TypedParse,
        message: format!("unexpected `{what}` shape"),
        details: err.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StreamJsonLine {
    pub line_number: usize,
    pub raw: String,
}

#[derive(Debug, Clone)]
pub enum StreamJsonLineOutcome {
    Ok {
        line: StreamJsonLine,
        event: ClaudeStreamJsonEvent,
    },
    Err {
        line: StreamJsonLine,
        error: StreamJsonLineError,
    },
}

pub fn parse_stream_json_lines(text: &str) -> Vec<StreamJsonLineOutcome> {
    let mut out = Vec::new();
    let mut parser = ClaudeStreamJsonParser::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_number = idx + 1;
        let raw = raw.trim_end_matches('\r');
        if raw.trim().is_empty() {
            continue;
        }
        let line = StreamJsonLine {
            line_number,
            raw: raw.to_string(),
        };
        match parser.parse_line(&line.raw) {
            Ok(Some(event)) => out.push(StreamJsonLineOutcome::Ok { line, event }),
            Ok(None) => {}
            Err(err) => out.push(StreamJsonLineOutcome::Err {
                line,
                error: StreamJsonLineError {
                    line_number,
                    message: err.message,
                },
            }),
        }
    }
    out
}
