//! Terminal-style presentation: replace-on-redraw buffering.
//!
//! Full-screen programs repaint by clearing the screen. A terminal-style
//! front-end that merely appended would show every repaint stacked; on a
//! screen-clear sequence it replaces its buffer with what follows instead.

/// Screen-clear / full-redraw markers as they appear in PTY output.
const CLEAR_SEQUENCES: [&str; 3] = [
    "\u{1b}[2J", // erase display
    "\u{1b}[3J", // erase display + scrollback
    "\u{1b}c",   // full reset
];

/// Whether a chunk contains a screen-clear control sequence.
pub fn contains_screen_clear(chunk: &str) -> bool {
    CLEAR_SEQUENCES.iter().any(|seq| chunk.contains(seq))
}

/// Append-or-replace buffer for a terminal-style view.
pub struct TerminalBuffer {
    content: String,
    max_bytes: usize,
}

impl TerminalBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            content: String::new(),
            max_bytes,
        }
    }

    /// Ingest one raw chunk. A screen clear discards everything before it;
    /// otherwise the chunk is appended. The buffer is trimmed from the
    /// front when it outgrows its cap.
    pub fn push(&mut self, chunk: &str) {
        match last_clear_position(chunk) {
            Some(after_clear) => {
                self.content.clear();
                self.content.push_str(&chunk[after_clear..]);
            }
            None => self.content.push_str(chunk),
        }

        if self.content.len() > self.max_bytes {
            let cut = floor_char_boundary(&self.content, self.content.len() - self.max_bytes);
            self.content.drain(..cut);
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Byte offset just past the last screen-clear sequence, if any.
fn last_clear_position(chunk: &str) -> Option<usize> {
    CLEAR_SEQUENCES
        .iter()
        .filter_map(|seq| chunk.rfind(seq).map(|pos| pos + seq.len()))
        .max()
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
