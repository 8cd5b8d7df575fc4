//! MCP-related error types.

use thiserror::Error;

/// Errors that can occur with MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server not found.
    #[error("MCP server not found: {name}")]
    ServerNotFound {
        /// The server name that was not found.
        name: String,
    },

    /// Server already running.
    #[error("MCP server already running: {name}")]
    ServerAlreadyRunning {
        /// The server name.
        name: String,
    },

    /// Server not running.
    #[error("MCP server not running: {name}")]
    ServerNotRunning {
        /// The server name.
        name: String,
    },

    /// Failed to start server.
    #[error("Failed to start MCP server {name}: {reason}")]
    ServerStartFailed {
        /// The server name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection failed.
    #[error("MCP connection failed: {0}")]
    ConnectionFailed(String),

    /// Tool not found.
    #[error("Tool not found: {server}:{tool}")]
    ToolNotFound {
        /// Server name.
        server: String,
        /// Tool name.
        tool: String,
    },

    /// Tool call failed.
    #[error("Tool call failed: {server}:{tool} - {reason}")]
    ToolCallFailed {
        /// Server name.
        server: String,
        /// Tool name.
        tool: String,
        /// Reason for failure.
        reason: String,
    },

    /// Binary hash mismatch.
    #[error("Binary hash mismatch for {name}: expected {expected}, got {actual}")]
    BinaryHashMismatch {
        /// Server name.
        name: String,
        /// Expected hash.
        expected: String,
        /// Actual hash.
        actual: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Tool call, or broken-pipe recovery retry, timed out.
    #[error("Operation timed out")]
    Timeout,

    /// MCP protocol error from rmcp.
    #[error("MCP protocol error: {0}")]
    ProtocolError(String),

    /// MCP initialization failed.
    #[error("MCP initialization failed: {0}")]
    InitializationFailed(String),

    /// The restart policy for this server forbids recovery right now
    /// (exhausted retries, or still inside the backoff cooldown window).
    #[error("Restart not allowed for {name} (policy or backoff cooldown)")]
    RestartNotAllowed {
        /// Server name.
        name: String,
    },
}

impl From<rmcp::ServiceError> for McpError {
    fn from(err: rmcp::ServiceError) -> Self {
        Self::ProtocolError(err.to_string())
    }
}

impl From<rmcp::service::ClientInitializeError> for McpError {
    fn from(err: rmcp::service::ClientInitializeError) -> Self {
        Self::InitializationFailed(err.to_string())
    }
}

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Substrings that identify a transport failure as a broken-pipe / dead-process
/// condition eligible for the exactly-once recovery retry, rather than an
/// ordinary tool error.
///
/// Matched case-insensitively against the error's `Display` text, since rmcp
/// and the underlying OS surface these as plain strings, not a typed variant.
const BROKEN_PIPE_PATTERNS: &[&str] = &[
    "broken pipe",
    "connection reset",
    "transport closed",
    "channel closed",
    "os error 32",
    "epipe",
    "stream closed",
    "process exited",
];

/// Whether an error's message matches the broken-pipe/dead-transport catalog.
#[must_use]
pub fn is_broken_pipe(message: &str) -> bool {
    let lower = message.to_lowercase();
    BROKEN_PIPE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_broken_pipe_patterns() {
        assert!(is_broken_pipe("Broken pipe (os error 32)"));
        assert!(is_broken_pipe("write: connection reset by peer"));
        assert!(is_broken_pipe("the transport closed unexpectedly"));
    }

    #[test]
    fn ignores_unrelated_errors() {
        assert!(!is_broken_pipe("invalid arguments for tool"));
        assert!(!is_broken_pipe("tool not found"));
    }
}
