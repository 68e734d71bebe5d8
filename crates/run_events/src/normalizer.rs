use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::claude_code_adapter::{normalize_claude_code_event, ClaudeCodeLineParser};
use crate::codex_adapter::{normalize_codex_event, CodexLineParser};
use crate::config::{ErrorDetailCapture, IngestConfig};
use crate::decode::DecodedLine;
use crate::error::{ErrorDetail, ErrorDetailSink};
use crate::line_parser::{ClassifiedParserError, LineInput, LineParser};
use crate::normalized::{
    AgentKind, FailureKind, NormalizedEvent, NormalizedEvents, TurnFailure,
};

const MAX_REMEMBERED_DIAGNOSTICS: usize = 20;

/// Per-run bookkeeping shared by both adapters.
#[derive(Debug, Default)]
pub(crate) struct NormalizerState {
    resume_token: Option<String>,
    pending_tools: HashMap<String, String>,
    synthetic_ids: usize,
    terminal_seen: bool,
    diagnostics: Vec<String>,
    reported_error: Option<String>,
}

impl NormalizerState {
    /// Emits `ResumeCaptured` for the first non-empty token only.
    pub(crate) fn capture_resume(&mut self, token: &str) -> Option<NormalizedEvent> {
        if self.resume_token.is_some() || token.trim().is_empty() {
            return None;
        }
        self.resume_token = Some(token.to_string());
        Some(NormalizedEvent::ResumeCaptured {
            token: token.to_string(),
        })
    }

    pub(crate) fn tool_id(&mut self, upstream: &str) -> String {
        if !upstream.trim().is_empty() {
            return upstream.to_string();
        }
        self.synthetic_ids += 1;
        format!("synthetic-tool-{}", self.synthetic_ids)
    }

    pub(crate) fn start_tool(&mut self, id: String, name: String, input: Value) -> NormalizedEvent {
        self.pending_tools.insert(id.clone(), name.clone());
        NormalizedEvent::ToolStarted { id, name, input }
    }

    pub(crate) fn complete_tool(
        &mut self,
        id: String,
        fallback_name: &str,
        output: Value,
        is_error: bool,
    ) -> NormalizedEvent {
        let (name, matched) = match self.pending_tools.remove(&id) {
            Some(name) => (name, true),
            None => (fallback_name.to_string(), false),
        };
        if !matched {
            debug!(tool_id = %id, "tool completion without a matching start");
        }
        NormalizedEvent::ToolCompleted {
            id,
            name,
            output,
            is_error,
            matched,
        }
    }

    pub(crate) fn remember_error(&mut self, message: &str) {
        if !message.trim().is_empty() {
            self.reported_error = Some(message.to_string());
        }
    }

    fn remember_diagnostic(&mut self, text: &str) {
        if self.diagnostics.len() == MAX_REMEMBERED_DIAGNOSTICS {
            self.diagnostics.remove(0);
        }
        self.diagnostics.push(text.to_string());
    }

    fn observe(&mut self, events: &NormalizedEvents) {
        if events.0.iter().any(NormalizedEvent::is_terminal) {
            self.terminal_seen = true;
        }
    }

    fn interrupted_message(&self) -> String {
        if let Some(message) = &self.reported_error {
            return message.clone();
        }
        let mut message = "run ended without a terminal event".to_string();
        if !self.diagnostics.is_empty() {
            message.push_str(":\n");
            message.push_str(&self.diagnostics.join("\n"));
        }
        message
    }
}

enum Adapter {
    Codex(CodexLineParser),
    ClaudeCode(ClaudeCodeLineParser),
}

/// Stateful translator from one run's native protocol lines to [`NormalizedEvent`]s.
///
/// One instance per run. The adapter is fixed at construction.
pub struct EventNormalizer {
    adapter: Adapter,
    state: NormalizerState,
    error_detail_capture: ErrorDetailCapture,
    error_sink: Option<Box<dyn ErrorDetailSink>>,
}

impl std::fmt::Debug for EventNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNormalizer")
            .field("kind", &self.kind())
            .field("state", &self.state)
            .finish()
    }
}

impl EventNormalizer {
    pub fn new(kind: AgentKind) -> Self {
        Self::with_config(kind, IngestConfig::default())
    }

    pub fn with_config(kind: AgentKind, config: IngestConfig) -> Self {
        let adapter = match kind {
            AgentKind::Codex => Adapter::Codex(CodexLineParser::new()),
            AgentKind::ClaudeCode => Adapter::ClaudeCode(ClaudeCodeLineParser::new()),
        };
        Self {
            adapter,
            state: NormalizerState::default(),
            error_detail_capture: config.error_detail_capture,
            error_sink: config.error_sink,
        }
    }

    pub fn kind(&self) -> AgentKind {
        match self.adapter {
            Adapter::Codex(_) => AgentKind::Codex,
            Adapter::ClaudeCode(_) => AgentKind::ClaudeCode,
        }
    }

    pub fn resume_token(&self) -> Option<&str> {
        self.state.resume_token.as_deref()
    }

    pub fn terminal_seen(&self) -> bool {
        self.state.terminal_seen
    }

    /// Diagnostic (non-JSON) lines seen so far, most recent last.
    pub fn diagnostics(&self) -> &[String] {
        &self.state.diagnostics
    }

    pub fn normalize(&mut self, line: &DecodedLine) -> NormalizedEvents {
        let events = match line {
            DecodedLine::Json {
                line_number,
                text,
                value,
            } => {
                let input = LineInput {
                    line: text,
                    json: Some(value),
                };
                match &mut self.adapter {
                    Adapter::Codex(parser) => {
                        match parse_or_report(parser, input, *line_number, "codex") {
                            Ok(Some(event)) => normalize_codex_event(&mut self.state, event),
                            Ok(None) => NormalizedEvents::default(),
                            Err(detail) => self.report(detail),
                        }
                    }
                    Adapter::ClaudeCode(parser) => {
                        match parse_or_report(parser, input, *line_number, "claude_code") {
                            Ok(Some(event)) => {
                                normalize_claude_code_event(&mut self.state, event)
                            }
                            Ok(None) => NormalizedEvents::default(),
                            Err(detail) => self.report(detail),
                        }
                    }
                }
            }
            DecodedLine::Diagnostic { line_number, text } => {
                debug!(line_number, "non-JSON line in run log");
                self.state.remember_diagnostic(text);
                NormalizedEvents::default()
            }
            DecodedLine::Rejected { line_number, error } => {
                warn!(line_number, %error, "skipping unreadable run log line");
                NormalizedEvents::default()
            }
        };
        self.state.observe(&events);
        events
    }

    /// Closes the run. Yields an interrupted failure when no terminal event was seen.
    pub fn finish(&mut self) -> Option<NormalizedEvent> {
        if self.state.terminal_seen {
            return None;
        }
        self.state.terminal_seen = true;
        let message = self.state.interrupted_message();
        let hint = match self.adapter {
            Adapter::Codex(_) => codex::auth_failure_hint(&message).map(str::to_string),
            Adapter::ClaudeCode(_) => None,
        };
        Some(NormalizedEvent::TurnFailed(TurnFailure {
            kind: FailureKind::Interrupted,
            message,
            hint,
        }))
    }

    fn report(&mut self, detail: ErrorDetail) -> NormalizedEvents {
        if self.error_detail_capture == ErrorDetailCapture::FullDetails {
            if let Some(sink) = self.error_sink.as_mut() {
                sink.on_error(detail);
            }
        }
        NormalizedEvents::default()
    }
}

fn parse_or_report<P: LineParser>(
    parser: &mut P,
    input: LineInput<'_>,
    line_number: usize,
    adapter: &'static str,
) -> Result<Option<P::Event>, ErrorDetail> {
    parser.parse_line(input).map_err(|err| {
        warn!(
            line_number,
            adapter,
            code = ?err.code(),
            summary = %err.redacted_summary(),
            "skipping malformed protocol line"
        );
        ErrorDetail {
            line_number,
            code: err.code(),
            adapter,
            details: err.full_details(),
        }
    })
}
