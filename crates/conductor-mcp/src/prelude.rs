//! Convenience re-exports.
//!
//! ```rust
//! use conductor_mcp::prelude::*;
//! ```

// Errors
pub use crate::{McpError, McpResult, is_broken_pipe};

// Client & registry
pub use crate::{McpClient, McpRegistry};

// Server lifecycle
pub use crate::{McpServerStatus, ServerManager};

// Config
pub use crate::{RestartPolicy, ServerConfig, ServersConfig, Transport};

// Wire types
pub use crate::{
    PromptArgument, PromptContent, PromptDefinition, PromptMessage, ResourceContent,
    ResourceDefinition, ServerCapabilities, ServerInfo, ToolContent, ToolDefinition, ToolResult,
};
