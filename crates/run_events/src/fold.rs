use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalized::{FailureKind, NormalizedEvent, TurnUsage};

const BLOCK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBlock {
    Text { text: String },
    Thinking { text: String },
    ToolUse { tool_call_id: String },
}

/// A started/completed tool pair collapsed into one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MessageOutcome {
    InProgress,
    Completed,
    Failed {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    Interrupted {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
    /// Stopped on request before the backend finished the turn.
    Cancelled,
}

impl MessageOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, MessageOutcome::InProgress)
    }
}

/// Message-level view of a run, or the user turn that started it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    /// All text blocks joined, for consumers that only render plain text.
    pub content: String,
    pub blocks: Vec<MessageBlock>,
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TurnUsage>,
    pub outcome: MessageOutcome,
}

impl ChatMessage {
    pub fn user(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            role: MessageRole::User,
            blocks: vec![MessageBlock::Text {
                text: prompt.clone(),
            }],
            content: prompt,
            tool_calls: Vec::new(),
            usage: None,
            outcome: MessageOutcome::Completed,
        }
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| call.id == id)
    }
}

/// Folds a run's normalized events into a single assistant [`ChatMessage`].
///
/// Adjacent text chunks share one block, as do adjacent thinking chunks. A tool start ends the
/// current block. A completion with no open call still produces a tool call.
#[derive(Debug, Clone)]
pub struct MessageFolder {
    message: ChatMessage,
}

impl Default for MessageFolder {
    fn default() -> Self {
        Self {
            message: ChatMessage {
                role: MessageRole::Assistant,
                content: String::new(),
                blocks: Vec::new(),
                tool_calls: Vec::new(),
                usage: None,
                outcome: MessageOutcome::InProgress,
            },
        }
    }
}

impl MessageFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn into_message(self) -> ChatMessage {
        self.message
    }

    pub fn apply(&mut self, event: &NormalizedEvent) {
        let message = &mut self.message;
        match event {
            NormalizedEvent::TextChunk { text } => {
                if let Some(MessageBlock::Text { text: current }) = message.blocks.last_mut() {
                    current.push_str(BLOCK_SEPARATOR);
                    current.push_str(text);
                } else {
                    message.blocks.push(MessageBlock::Text { text: text.clone() });
                }
                if !message.content.is_empty() {
                    message.content.push_str(BLOCK_SEPARATOR);
                }
                message.content.push_str(text);
            }
            NormalizedEvent::ThinkingChunk { text } => {
                if let Some(MessageBlock::Thinking { text: current }) = message.blocks.last_mut()
                {
                    current.push_str(BLOCK_SEPARATOR);
                    current.push_str(text);
                } else {
                    message
                        .blocks
                        .push(MessageBlock::Thinking { text: text.clone() });
                }
            }
            NormalizedEvent::ToolStarted { id, name, input } => {
                message.tool_calls.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                    output: None,
                    is_error: false,
                });
                message.blocks.push(MessageBlock::ToolUse {
                    tool_call_id: id.clone(),
                });
            }
            NormalizedEvent::ToolCompleted {
                id,
                name,
                output,
                is_error,
                ..
            } => {
                let open = message
                    .tool_calls
                    .iter_mut()
                    .rev()
                    .find(|call| call.id == *id && call.output.is_none());
                match open {
                    Some(call) => {
                        call.output = Some(output.clone());
                        call.is_error = *is_error;
                    }
                    None => {
                        message.tool_calls.push(ToolCall {
                            id: id.clone(),
                            name: name.clone(),
                            input: Value::Null,
                            output: Some(output.clone()),
                            is_error: *is_error,
                        });
                        message.blocks.push(MessageBlock::ToolUse {
                            tool_call_id: id.clone(),
                        });
                    }
                }
            }
            NormalizedEvent::TurnUsage(usage) => {
                message.usage = Some(*usage);
                message.outcome = MessageOutcome::Completed;
            }
            NormalizedEvent::TurnFailed(failure) => {
                let message_text = failure.message.clone();
                let hint = failure.hint.clone();
                message.outcome = match failure.kind {
                    FailureKind::Reported => MessageOutcome::Failed {
                        message: message_text,
                        hint,
                    },
                    FailureKind::Interrupted => MessageOutcome::Interrupted {
                        message: message_text,
                        hint,
                    },
                };
            }
            NormalizedEvent::ResumeCaptured { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalized::TurnFailure;
    use serde_json::json;

    fn text(t: &str) -> NormalizedEvent {
        NormalizedEvent::TextChunk {
            text: t.to_string(),
        }
    }

    #[test]
    fn adjacent_chunks_coalesce_until_a_tool_breaks_them() {
        let mut folder = MessageFolder::new();
        for event in [
            text("a"),
            text("b"),
            NormalizedEvent::ToolStarted {
                id: "t".to_string(),
                name: "Bash".to_string(),
                input: json!({"command": "ls"}),
            },
            NormalizedEvent::ToolCompleted {
                id: "t".to_string(),
                name: "Bash".to_string(),
                output: json!("out"),
                is_error: false,
                matched: true,
            },
            text("c"),
        ] {
            folder.apply(&event);
        }

        let message = folder.into_message();
        assert_eq!(
            message.blocks,
            vec![
                MessageBlock::Text {
                    text: "a\n\nb".to_string()
                },
                MessageBlock::ToolUse {
                    tool_call_id: "t".to_string()
                },
                MessageBlock::Text {
                    text: "c".to_string()
                },
            ]
        );
        assert_eq!(message.content, "a\n\nb\n\nc");
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].output, Some(json!("out")));
        assert_eq!(message.outcome, MessageOutcome::InProgress);
    }

    #[test]
    fn unmatched_completion_still_records_a_call() {
        let mut folder = MessageFolder::new();
        folder.apply(&NormalizedEvent::ToolCompleted {
            id: "late".to_string(),
            name: "FileChange".to_string(),
            output: json!([]),
            is_error: false,
            matched: false,
        });
        folder.apply(&NormalizedEvent::TurnFailed(TurnFailure {
            kind: FailureKind::Interrupted,
            message: "gone".to_string(),
            hint: None,
        }));

        let message = folder.message();
        let call = message.tool_call("late").unwrap();
        assert_eq!(call.input, Value::Null);
        assert!(matches!(
            message.outcome,
            MessageOutcome::Interrupted { ref message, .. } if message == "gone"
        ));
    }
}
