use serde_json::Value;

use crate::error::{AdapterErrorCode, LineRecordError};
use crate::reader::BoundedLine;

/// A delimited log line sorted into what the normalizer can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// A JSON object; the only shape any backend protocol uses.
    Json {
        line_number: usize,
        text: String,
        value: Value,
    },
    /// Anything else the process wrote, typically stderr redirected into the log.
    /// Broken JSON objects are `Rejected` instead.
    Diagnostic { line_number: usize, text: String },
    Rejected {
        line_number: usize,
        error: LineRecordError,
    },
}

impl DecodedLine {
    pub fn line_number(&self) -> usize {
        match self {
            DecodedLine::Json { line_number, .. }
            | DecodedLine::Diagnostic { line_number, .. }
            | DecodedLine::Rejected { line_number, .. } => *line_number,
        }
    }
}

/// Returns `None` for blank lines. A trailing `\r` is stripped.
pub fn decode_line(line: BoundedLine) -> Option<DecodedLine> {
    match line {
        BoundedLine::IoError { line_number } => Some(DecodedLine::Rejected {
            line_number,
            error: LineRecordError::Io,
        }),
        BoundedLine::LineTooLong {
            line_number,
            observed_bytes,
            max_line_bytes,
        } => Some(DecodedLine::Rejected {
            line_number,
            error: LineRecordError::LineTooLong {
                observed_bytes,
                max_line_bytes,
            },
        }),
        BoundedLine::Line { line_number, bytes } => {
            let Ok(mut text) = String::from_utf8(bytes) else {
                return Some(DecodedLine::Rejected {
                    line_number,
                    error: LineRecordError::InvalidUtf8,
                });
            };
            if text.ends_with('\r') {
                text.pop();
            }
            if text.chars().all(char::is_whitespace) {
                return None;
            }
            match serde_json::from_str::<Value>(&text) {
                Ok(value) if value.is_object() => Some(DecodedLine::Json {
                    line_number,
                    text,
                    value,
                }),
                Err(err) if text.trim_start().starts_with('{') => Some(DecodedLine::Rejected {
                    line_number,
                    error: LineRecordError::Adapter {
                        code: AdapterErrorCode::JsonParse,
                        summary: err.to_string(),
                    },
                }),
                _ => Some(DecodedLine::Diagnostic { line_number, text }),
            }
        }
    }
}
