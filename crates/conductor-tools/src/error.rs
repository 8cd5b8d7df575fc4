//! Catalog, offload, and dispatch errors.

use thiserror::Error;

/// Errors raised by the tool catalog, output store, and virtual tool dispatch.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A tool name was looked up but is not present in any layer of the catalog.
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// A custom tool was registered with a name already taken by another tool.
    #[error("duplicate tool name: {0}")]
    DuplicateToolName(String),

    /// Tool arguments failed to parse as the tool's expected shape.
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments {
        /// Tool name the arguments were destined for.
        tool: String,
        /// Why parsing failed.
        reason: String,
    },

    /// The model emitted a tool call with an empty name.
    #[error("empty tool name in tool call")]
    EmptyToolName,

    /// A `search_tools` query failed to compile as a regular expression.
    #[error("invalid search query: {0}")]
    InvalidSearchQuery(String),

    /// An offload or retrieval path operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying MCP layer reported an error while dispatching.
    #[error("MCP error: {0}")]
    Mcp(#[from] conductor_mcp::McpError),

    /// A custom tool's host-supplied executor returned an error.
    #[error("custom tool {tool} failed: {reason}")]
    CustomToolFailed {
        /// Tool name.
        tool: String,
        /// Failure reason reported by the executor.
        reason: String,
    },

    /// Serialization of tool output failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for catalog/dispatch operations.
pub type CatalogResult<T> = Result<T, CatalogError>;
