//! Bounded line ring buffer over the raw PTY byte stream.
//!
//! Lines are defined by `\n` splits; an incomplete tail is carried forward
//! until its newline arrives. The oldest line is evicted once the buffer
//! exceeds its capacity.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct LineRing {
    lines: VecDeque<String>,
    partial: String,
    capacity: usize,
}

impl LineRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            partial: String::new(),
            capacity,
        }
    }

    /// Feed one decoded PTY chunk into the ring.
    pub fn push_chunk(&mut self, chunk: &str) {
        self.partial.push_str(chunk);

        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            // Strip the newline (and a preceding \r from CRLF output).
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.push_line(line);
        }
    }

    fn push_line(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Complete lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
