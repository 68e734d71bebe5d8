use run_events::{ChatMessage, MessageOutcome, RunStream, TurnUsage};
use serde::{Deserialize, Serialize};

use crate::run_log::RunLogHeader;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// The backend reported a failure.
    Failed,
    /// The process ended without a terminal event.
    Interrupted,
    /// Killed on request.
    Cancelled,
}

impl RunStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Final state of one run, as derived from its log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<RunLogHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TurnUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bytes of the log consumed.
    pub log_offset: u64,
}

impl RunSummary {
    pub(crate) fn from_stream(stream: RunStream, log_offset: u64) -> Self {
        let header = stream.header().and_then(RunLogHeader::from_value);
        let resume_token = stream.resume_token().map(str::to_owned);
        let message = stream.into_message();

        let (status, error) = match &message.outcome {
            MessageOutcome::Completed => (RunStatus::Completed, None),
            MessageOutcome::Failed { message, .. } => (RunStatus::Failed, Some(message.clone())),
            MessageOutcome::Interrupted { message, .. } => {
                (RunStatus::Interrupted, Some(message.clone()))
            }
            MessageOutcome::Cancelled => (RunStatus::Cancelled, None),
            MessageOutcome::InProgress => (RunStatus::Running, None),
        };

        Self {
            status,
            usage: message.usage,
            message,
            header,
            resume_token,
            error,
            log_offset,
        }
    }
}
