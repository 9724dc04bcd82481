//! Chat-transport presentation: buffering, chunking, and ANSI scrubbing.
//!
//! Chat surfaces cannot render a terminal, so output is scrubbed of escape
//! sequences, batched briefly to avoid message spam, and split below the
//! transport's message size limit.

use std::time::{Duration, Instant};

/// Flush pending output after this long even if the buffer is small.
const FLUSH_AFTER: Duration = Duration::from_millis(500);

/// Flush immediately once this many bytes are pending.
const MAX_PENDING: usize = 8192;

/// Outgoing messages are split at this many characters.
const CHUNK_CHARS: usize = 4096;

/// Batches PTY output into chat-sized messages.
///
/// `push` ingests scrubbed output and returns any chunks that became due
/// because of the size threshold; `poll` returns chunks once the time
/// threshold passes. The caller drives `poll` from its own timer.
pub struct ChatBuffer {
    pending: String,
    oldest: Option<Instant>,
    flush_after: Duration,
    max_pending: usize,
    chunk_chars: usize,
}

impl ChatBuffer {
    pub fn new() -> Self {
        Self::with_limits(FLUSH_AFTER, MAX_PENDING, CHUNK_CHARS)
    }

    pub fn with_limits(flush_after: Duration, max_pending: usize, chunk_chars: usize) -> Self {
        Self {
            pending: String::new(),
            oldest: None,
            flush_after,
            max_pending,
            chunk_chars,
        }
    }

    /// Ingest one output chunk. Returns messages to emit now (size limit).
    pub fn push(&mut self, data: &str) -> Vec<String> {
        let scrubbed = scrub_ansi(data);
        if scrubbed.is_empty() {
            return Vec::new();
        }
        if self.pending.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.pending.push_str(&scrubbed);

        if self.pending.len() >= self.max_pending {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// Returns messages to emit now if the pending output has aged out.
    pub fn poll(&mut self) -> Vec<String> {
        match self.oldest {
            Some(oldest) if oldest.elapsed() >= self.flush_after => self.flush(),
            _ => Vec::new(),
        }
    }

    /// Flush everything pending, split into transport-sized chunks.
    pub fn flush(&mut self) -> Vec<String> {
        self.oldest = None;
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        let text = std::mem::take(&mut self.pending);
        chunk_chars(&text, self.chunk_chars)
    }
}

impl Default for ChatBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split on character boundaries at most `limit` chars per chunk.
fn chunk_chars(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for c in text.chars() {
        current.push(c);
        count += 1;
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Strip ANSI escape sequences and control characters.
///
/// Handles CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL` / `ESC \`), and
/// bare two-byte escapes. Control characters other than newline and tab
/// are dropped; carriage returns vanish so CRLF becomes a plain newline.
pub fn scrub_ansi(input: &str) -> String {
    #[derive(Clone, Copy)]
    enum State {
        Plain,
        Escape,
        Csi,
        Osc,
        OscEscape,
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Plain;
    for c in input.chars() {
        state = match state {
            State::Plain => match c {
                '\u{1b}' => State::Escape,
                '\n' | '\t' => {
                    out.push(c);
                    State::Plain
                }
                c if c.is_control() => State::Plain,
                c => {
                    out.push(c);
                    State::Plain
                }
            },
            State::Escape => match c {
                '[' => State::Csi,
                ']' => State::Osc,
                // Two-byte escape like ESC ( or ESC =; swallow it.
                _ => State::Plain,
            },
            State::Csi => {
                if ('\u{40}'..='\u{7e}').contains(&c) {
                    State::Plain
                } else {
                    State::Csi
                }
            }
            State::Osc => match c {
                '\u{7}' => State::Plain,
                '\u{1b}' => State::OscEscape,
                _ => State::Osc,
            },
            State::OscEscape => State::Plain, // ESC \ string terminator
        };
    }
    out
}
