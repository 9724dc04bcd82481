//! Presentation helpers for the reference adapters.
//!
//! Purely presentational: nothing here feeds back into the protocol. The
//! agent and relay ship raw PTY bytes; how a front-end renders them is its
//! own business.

mod chat;
mod terminal;

pub use chat::{scrub_ansi, ChatBuffer};
pub use terminal::{contains_screen_clear, TerminalBuffer};
