//! MCP client and server lifecycle management for the conductor agent runtime.
//!
//! The centerpiece is the Session Connection Registry ([`server::ServerManager`]):
//! a process-global map of `(session, server name) -> connection`, ref-counted
//! and keyed by each server's `stateless` flag. [`McpClient`] is the
//! high-level facade the turn loop calls into, including the exactly-once
//! broken-pipe recovery path. [`McpRegistry`] layers a global and an
//! optional per-workspace client behind one `list_tools()`/`call_tool()`
//! surface.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod client;
mod config;
mod error;
mod registry;
mod server;
mod types;

pub mod prelude;

pub use client::McpClient;
pub use config::{RestartPolicy, ServerConfig, ServersConfig, Transport};
pub use error::{McpError, McpResult, is_broken_pipe};
pub use registry::McpRegistry;
pub use server::{McpServerStatus, ServerManager};
pub use types::{
    PromptArgument, PromptContent, PromptDefinition, PromptMessage, ResourceContent,
    ResourceDefinition, ServerCapabilities, ServerInfo, ToolContent, ToolDefinition, ToolResult,
};
