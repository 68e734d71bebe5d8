/// One newline-delimited line, or the reason it could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    LineTooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    IoError {
        line_number: usize,
    },
}

impl BoundedLine {
    pub fn line_number(&self) -> usize {
        match self {
            BoundedLine::Line { line_number, .. }
            | BoundedLine::LineTooLong { line_number, .. }
            | BoundedLine::IoError { line_number } => *line_number,
        }
    }
}

/// Push-based splitter for a file that is still being written.
///
/// Bytes after the last `\n` stay buffered until more data arrives or [`finish`](Self::finish)
/// is called. Oversized lines are dropped while their bytes keep being counted, so memory stays
/// bounded by `max_line_bytes`.
#[derive(Debug)]
pub struct IncrementalLineSplitter {
    max_line_bytes: usize,
    current_line: Vec<u8>,
    observed_bytes: usize,
    discard_mode: bool,
    line_number: usize,
}

impl IncrementalLineSplitter {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            current_line: Vec::new(),
            observed_bytes: 0,
            discard_mode: false,
            line_number: 0,
        }
    }

    /// Number of lines handed out so far.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Bytes of the trailing partial line not yet delivered.
    pub fn pending_bytes(&self) -> usize {
        self.observed_bytes
    }

    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<BoundedLine> {
        let mut out = Vec::new();
        while !chunk.is_empty() {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(idx) => {
                    self.append(&chunk[..idx]);
                    out.push(self.finish_line());
                    chunk = &chunk[idx + 1..];
                }
                None => {
                    self.append(chunk);
                    break;
                }
            }
        }
        out
    }

    /// Flushes a trailing line that never received its newline.
    pub fn finish(&mut self) -> Option<BoundedLine> {
        if self.observed_bytes == 0 && !self.discard_mode {
            return None;
        }
        Some(self.finish_line())
    }

    fn append(&mut self, segment: &[u8]) {
        self.observed_bytes = self.observed_bytes.saturating_add(segment.len());
        if self.observed_bytes > self.max_line_bytes {
            if !self.discard_mode {
                self.discard_mode = true;
                self.current_line = Vec::new();
            }
            return;
        }
        self.current_line.extend_from_slice(segment);
    }

    fn finish_line(&mut self) -> BoundedLine {
        self.line_number += 1;
        let line_number = self.line_number;
        let observed_bytes = self.observed_bytes;
        let discarded = self.discard_mode;

        let bytes = std::mem::take(&mut self.current_line);
        self.observed_bytes = 0;
        self.discard_mode = false;

        if discarded {
            BoundedLine::LineTooLong {
                line_number,
                observed_bytes,
                max_line_bytes: self.max_line_bytes,
            }
        } else {
            BoundedLine::Line { line_number, bytes }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(line: &BoundedLine) -> &str {
        match line {
            BoundedLine::Line { bytes, .. } => std::str::from_utf8(bytes).unwrap(),
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn partial_lines_wait_for_their_newline() {
        let mut splitter = IncrementalLineSplitter::new(1024);

        assert!(splitter.push(b"{\"a\":").is_empty());
        assert_eq!(splitter.pending_bytes(), 5);

        let lines = splitter.push(b"1}\n{\"b\"");
        assert_eq!(lines.len(), 1);
        assert_eq!(text(&lines[0]), "{\"a\":1}");
        assert_eq!(lines[0].line_number(), 1);
        assert_eq!(splitter.pending_bytes(), 4);

        let last = splitter.finish().unwrap();
        assert_eq!(text(&last), "{\"b\"");
        assert_eq!(last.line_number(), 2);
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn oversized_line_spanning_chunks_is_reported_once() {
        let mut splitter = IncrementalLineSplitter::new(8);

        assert!(splitter.push(b"0123456").is_empty());
        assert!(splitter.push(b"789abc").is_empty());
        let lines = splitter.push(b"def\nok\n");

        assert_eq!(
            lines[0],
            BoundedLine::LineTooLong {
                line_number: 1,
                observed_bytes: 16,
                max_line_bytes: 8,
            }
        );
        assert_eq!(text(&lines[1]), "ok");
    }

    #[test]
    fn empty_lines_still_advance_numbering() {
        let mut splitter = IncrementalLineSplitter::new(16);
        let lines = splitter.push(b"\n\nx\n");
        let numbers: Vec<_> = lines.iter().map(BoundedLine::line_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
