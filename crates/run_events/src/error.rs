use thiserror::Error;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AdapterErrorCode {
    JsonParse,
    Normalize,
    TypedParse,
    Unknown,
}

/// Why a single log line produced no events. Never fatal for the stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LineRecordError {
    #[error("I/O error while reading run log")]
    Io,
    #[error("invalid UTF-8 in run log")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("adapter parse failure ({code:?}): {summary}")]
    Adapter {
        code: AdapterErrorCode,
        summary: String,
    },
}

#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub line_number: usize,
    pub code: AdapterErrorCode,
    pub adapter: &'static str,
    pub details: String,
}

pub trait ErrorDetailSink: Send + 'static {
    fn on_error(&mut self, detail: ErrorDetail);
}
