use serde_json::Value;
use tracing::trace;

use crate::config::IngestConfig;
use crate::decode::{decode_line, DecodedLine};
use crate::fold::{ChatMessage, MessageFolder};
use crate::normalized::{AgentKind, NormalizedEvent};
use crate::normalizer::EventNormalizer;
use crate::reader::{BoundedLine, IncrementalLineSplitter};

/// Key marking the run log's metadata header line.
pub const RUN_META_KEY: &str = "_run_meta";

/// Everything needed to turn one run log into events and a folded message.
///
/// Bytes can be pushed as they are read from a growing file ([`feed`](Self::feed)) or whole lines
/// can be pushed from a complete file ([`push_line`](Self::push_line)); both paths split and
/// decode lines identically. The stream closes at the first terminal event and ignores the rest.
#[derive(Debug)]
pub struct RunStream {
    splitter: IncrementalLineSplitter,
    normalizer: EventNormalizer,
    folder: MessageFolder,
    header: Option<Value>,
    closed: bool,
}

impl RunStream {
    pub fn new(kind: AgentKind, config: IngestConfig) -> Self {
        Self {
            splitter: IncrementalLineSplitter::new(config.limits.max_line_bytes),
            normalizer: EventNormalizer::with_config(kind, config),
            folder: MessageFolder::new(),
            header: None,
            closed: false,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.normalizer.kind()
    }

    /// `true` once a terminal event was produced or [`finish`](Self::finish) ran.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The `_run_meta` header object, once seen.
    pub fn header(&self) -> Option<&Value> {
        self.header.as_ref()
    }

    pub fn resume_token(&self) -> Option<&str> {
        self.normalizer.resume_token()
    }

    pub fn message(&self) -> &ChatMessage {
        self.folder.message()
    }

    pub fn into_message(self) -> ChatMessage {
        self.folder.into_message()
    }

    /// Bytes fed so far that have not yet formed a complete line.
    pub fn pending_bytes(&self) -> usize {
        self.splitter.pending_bytes()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<NormalizedEvent> {
        let mut out = Vec::new();
        for line in self.splitter.push(bytes) {
            out.extend(self.push_line(line));
        }
        out
    }

    pub fn push_line(&mut self, line: BoundedLine) -> Vec<NormalizedEvent> {
        if self.closed {
            return Vec::new();
        }
        let Some(decoded) = decode_line(line) else {
            return Vec::new();
        };
        if let DecodedLine::Json {
            line_number, value, ..
        } = &decoded
        {
            if value.get(RUN_META_KEY).is_some() {
                trace!(line_number, "run log header");
                if self.header.is_none() {
                    self.header = Some(value.clone());
                }
                return Vec::new();
            }
        }

        let mut out = Vec::new();
        for event in self.normalizer.normalize(&decoded) {
            self.folder.apply(&event);
            let terminal = event.is_terminal();
            out.push(event);
            if terminal {
                self.closed = true;
                break;
            }
        }
        out
    }

    /// Flushes a trailing unterminated line, then closes the stream.
    ///
    /// Returns the flushed line's events followed by a synthesized interrupted failure when the
    /// log never reached a terminal event.
    pub fn finish(&mut self) -> Vec<NormalizedEvent> {
        let mut out = Vec::new();
        if let Some(line) = self.splitter.finish() {
            out.extend(self.push_line(line));
        }
        if !self.closed {
            if let Some(event) = self.normalizer.finish() {
                self.folder.apply(&event);
                out.push(event);
            }
            self.closed = true;
        }
        out
    }
}
