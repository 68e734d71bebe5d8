use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Codex,
    ClaudeCode,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Codex => "codex",
            AgentKind::ClaudeCode => "claude_code",
        }
    }
}

/// Token and cost snapshot closing a successful turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend emitted its own failure event.
    Reported,
    /// The log ended without any terminal event.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Backend-agnostic event derived from one native protocol line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedEvent {
    TextChunk {
        text: String,
    },
    ThinkingChunk {
        text: String,
    },
    ToolStarted {
        id: String,
        name: String,
        input: Value,
    },
    ToolCompleted {
        id: String,
        name: String,
        output: Value,
        is_error: bool,
        /// `false` when no start was seen for `id` in this run.
        matched: bool,
    },
    TurnUsage(TurnUsage),
    TurnFailed(TurnFailure),
    ResumeCaptured {
        token: String,
    },
}

impl NormalizedEvent {
    /// Turn usage closes a successful turn; turn failure closes a failed one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NormalizedEvent::TurnUsage(_) | NormalizedEvent::TurnFailed(_)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedEvents(pub Vec<NormalizedEvent>);

impl NormalizedEvents {
    pub fn push(&mut self, event: NormalizedEvent) {
        self.0.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = NormalizedEvent>) {
        self.0.extend(events);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for NormalizedEvents {
    type Item = NormalizedEvent;
    type IntoIter = std::vec::IntoIter<NormalizedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Option<NormalizedEvent>> for NormalizedEvents {
    fn from(event: Option<NormalizedEvent>) -> Self {
        Self(event.into_iter().collect())
    }
}
