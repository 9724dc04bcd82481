//! Named constants for protocol error codes and WebSocket close codes.
//!
//! Shared between the relay (routing/auth errors) and the agent (command
//! errors) so that code strings stay in sync without duplicating literals.

// ---------------------------------------------------------------------------
// Error codes — transport and auth (relay-originated)
// ---------------------------------------------------------------------------

/// Frame was not parseable JSON or not a valid envelope.
pub const INVALID_JSON: &str = "INVALID_JSON";

/// Auth token mismatch.
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// A non-auth frame arrived before authentication completed.
pub const NOT_AUTHENTICATED: &str = "NOT_AUTHENTICATED";

/// A second agent tried to bind while one is already connected.
pub const AGENT_EXISTS: &str = "AGENT_EXISTS";

/// The auth payload declared a role outside {agent, client}.
pub const INVALID_ROLE: &str = "INVALID_ROLE";

/// A client issued a command while no agent is bound.
pub const NO_AGENT: &str = "NO_AGENT";

// ---------------------------------------------------------------------------
// Error codes — command dispatch (agent-originated)
// ---------------------------------------------------------------------------

/// The command name is not in the dispatch table.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";

/// `projectId` does not match any configured project.
pub const PROJECT_NOT_FOUND: &str = "PROJECT_NOT_FOUND";

/// Required `projectId` field absent.
pub const MISSING_PROJECT_ID: &str = "MISSING_PROJECT_ID";

/// Required `sessionId` field absent.
pub const MISSING_SESSION_ID: &str = "MISSING_SESSION_ID";

/// Required `input` field absent.
pub const MISSING_INPUT: &str = "MISSING_INPUT";

/// `sessionId` does not match any live session.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";

/// `upload_file` without `fileName` or `fileContent`.
pub const MISSING_FILE_DATA: &str = "MISSING_FILE_DATA";

/// `upload_file` decode or filesystem write failed.
pub const UPLOAD_FAILED: &str = "UPLOAD_FAILED";

/// The agent received a command before its session manager was available.
pub const NO_SESSION_MANAGER: &str = "NO_SESSION_MANAGER";

// ---------------------------------------------------------------------------
// WebSocket close codes
// ---------------------------------------------------------------------------

/// Auth failure or frames before authentication.
pub const CLOSE_AUTH_FAILURE: u16 = 4001;

/// An agent is already bound.
pub const CLOSE_AGENT_EXISTS: u16 = 4002;

/// The declared role was invalid.
pub const CLOSE_INVALID_ROLE: u16 = 4003;
