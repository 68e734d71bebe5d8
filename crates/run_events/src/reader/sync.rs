use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use super::incremental::{BoundedLine, IncrementalLineSplitter};

const CHUNK_SIZE_BYTES: usize = 8192;

/// Pull-based line reader over a complete source, sharing the splitter used for live tailing.
pub struct SyncBoundedLineReader<R: Read> {
    reader: R,
    splitter: IncrementalLineSplitter,
    buffer: Box<[u8; CHUNK_SIZE_BYTES]>,
    ready: VecDeque<BoundedLine>,
    done: bool,
}

impl<R: Read> SyncBoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            splitter: IncrementalLineSplitter::new(max_line_bytes),
            buffer: Box::new([0u8; CHUNK_SIZE_BYTES]),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for SyncBoundedLineReader<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }
            if self.done {
                return None;
            }

            match self.reader.read(&mut self.buffer[..]) {
                Ok(0) => {
                    self.done = true;
                    self.ready.extend(self.splitter.finish());
                }
                Ok(n) => {
                    let lines = self.splitter.push(&self.buffer[..n]);
                    self.ready.extend(lines);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(_) => {
                    self.done = true;
                    return Some(BoundedLine::IoError {
                        line_number: self.splitter.line_number() + 1,
                    });
                }
            }
        }
    }
}
