//! MCP client implementation.
//!
//! A thin, session-aware facade over [`ServerManager`]: the high-level
//! surface the turn loop calls into for tool/resource/prompt dispatch and
//! for broken-pipe recovery.

use rmcp::model::{CallToolRequestParams, GetPromptRequestParams, ReadResourceRequestParams};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use conductor_core::SessionId;

use crate::config::ServersConfig;
use crate::error::{McpError, McpResult, is_broken_pipe};
use crate::server::{McpServerStatus, ServerManager};
use crate::types::{
    PromptContent, PromptDefinition, ResourceContent, ResourceDefinition, ToolDefinition,
    ToolResult,
};

/// MCP client for interacting with MCP servers.
///
/// Cheaply cloneable: all state lives behind the shared [`ServerManager`] and
/// a small tools cache, both `Arc`-wrapped.
#[derive(Clone)]
pub struct McpClient {
    servers: Arc<ServerManager>,
    tools_cache: Arc<RwLock<Vec<ToolDefinition>>>,
}

impl McpClient {
    /// Create a new MCP client around a server manager.
    #[must_use]
    pub fn new(servers: ServerManager) -> Self {
        Self {
            servers: Arc::new(servers),
            tools_cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create from default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn from_default_config() -> McpResult<Self> {
        Ok(Self::new(ServerManager::from_default_config()?))
    }

    /// Create with custom configuration.
    #[must_use]
    pub fn with_config(config: ServersConfig) -> Self {
        Self::new(ServerManager::new(config))
    }

    /// Ensure a connection exists for `(session, server_name)`, starting it
    /// if necessary, then refresh the tools cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be started or connected.
    pub async fn connect(&self, session: &SessionId, server_name: &str) -> McpResult<()> {
        self.servers.get_or_create(session, server_name).await?;
        self.refresh_tools_cache().await;
        Ok(())
    }

    /// Disconnect a session's connection to a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not connected.
    pub async fn disconnect(&self, session: &SessionId, server_name: &str) -> McpResult<()> {
        self.servers.stop(session, server_name).await?;
        self.refresh_tools_cache().await;
        Ok(())
    }

    /// Connect every `auto_start` server into the shared global session.
    ///
    /// # Errors
    ///
    /// Individual server failures are logged and skipped; this only returns
    /// an error if nothing could be prepared at all.
    pub async fn connect_auto_servers(&self) -> McpResult<()> {
        self.servers.start_auto_servers().await?;
        self.refresh_tools_cache().await;
        Ok(())
    }

    /// Disconnect everything, across every session.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying stop calls return one that
    /// isn't already a benign "not running".
    pub async fn shutdown(&self) -> McpResult<()> {
        self.servers.stop_all().await?;
        self.tools_cache.write().await.clear();
        Ok(())
    }

    /// List all available tools across every connected server.
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools_cache.read().await.clone()
    }

    /// Get a specific tool definition.
    pub async fn get_tool(&self, server: &str, tool: &str) -> Option<ToolDefinition> {
        self.tools_cache
            .read()
            .await
            .iter()
            .find(|t| t.server == server && t.name == tool)
            .cloned()
    }

    /// Call a tool on a server, within the given session.
    ///
    /// Does not itself retry on broken-pipe errors -- see
    /// [`McpClient::call_tool_with_recovery`] for the turn loop's
    /// exactly-once recovery path.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not connected or the call fails.
    pub async fn call_tool(
        &self,
        session: &SessionId,
        server: &str,
        tool: &str,
        args: Value,
    ) -> McpResult<ToolResult> {
        let peer = self.servers.get_peer(session, server).await?;

        debug!(server = server, tool = tool, "Calling MCP tool");

        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                Some(map)
            },
        };

        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(tool.to_string()),
            arguments,
            task: None,
        };

        let result = peer
            .call_tool(params)
            .await
            .map_err(|e| McpError::ToolCallFailed {
                server: server.to_string(),
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult::from(result))
    }

    /// Call a tool, transparently recovering from a broken-pipe failure
    /// exactly once.
    ///
    /// On a broken-pipe error (matched against the catalog in
    /// [`crate::error::is_broken_pipe`]), this replaces the stale connection
    /// slot if the server's restart policy allows it and retries the call
    /// once. A second failure, or a policy-forbidden recovery, surfaces the
    /// original error.
    ///
    /// Returns `(result, recovered)` so the caller can emit the distinct
    /// `broken_pipe_detected` / `broken_pipe_retry_success` events.
    ///
    /// # Errors
    ///
    /// Returns an error if the (possibly retried) call still fails, or if
    /// recovery itself fails.
    pub async fn call_tool_with_recovery(
        &self,
        session: &SessionId,
        server: &str,
        tool: &str,
        args: Value,
    ) -> McpResult<(ToolResult, bool)> {
        match self.call_tool(session, server, tool, args.clone()).await {
            Ok(result) => Ok((result, false)),
            Err(e) if is_broken_pipe(&e.to_string()) => {
                let recovered = self.servers.recover(session, server).await?;
                if !recovered {
                    return Err(e);
                }
                self.refresh_tools_cache().await;
                let result = tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    self.call_tool(session, server, tool, args),
                )
                .await
                .map_err(|_| McpError::Timeout)??;
                Ok((result, true))
            },
            Err(e) => Err(e),
        }
    }

    /// List resources from a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not connected or the call fails.
    pub async fn list_resources(
        &self,
        session: &SessionId,
        server: &str,
    ) -> McpResult<Vec<ResourceDefinition>> {
        let peer = self.servers.get_peer(session, server).await?;
        let resources = peer.list_all_resources().await.map_err(McpError::from)?;

        Ok(resources
            .iter()
            .map(|r| ResourceDefinition::from_rmcp(r, server))
            .collect())
    }

    /// Read a resource from a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not connected or the call fails.
    pub async fn read_resource(
        &self,
        session: &SessionId,
        server: &str,
        uri: &str,
    ) -> McpResult<Vec<ResourceContent>> {
        let peer = self.servers.get_peer(session, server).await?;

        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };

        let result = peer.read_resource(params).await.map_err(McpError::from)?;

        Ok(result
            .contents
            .iter()
            .map(ResourceContent::from_rmcp)
            .collect())
    }

    /// List prompts from a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not connected or the call fails.
    pub async fn list_prompts(
        &self,
        session: &SessionId,
        server: &str,
    ) -> McpResult<Vec<PromptDefinition>> {
        let peer = self.servers.get_peer(session, server).await?;
        let prompts = peer.list_all_prompts().await.map_err(McpError::from)?;

        Ok(prompts
            .iter()
            .map(|p| PromptDefinition::from_rmcp(p, server))
            .collect())
    }

    /// Get a prompt from a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is not connected or the call fails.
    pub async fn get_prompt(
        &self,
        session: &SessionId,
        server: &str,
        name: &str,
        arguments: Option<serde_json::Map<String, Value>>,
    ) -> McpResult<PromptContent> {
        let peer = self.servers.get_peer(session, server).await?;

        let params = GetPromptRequestParams {
            meta: None,
            name: name.to_string(),
            arguments,
        };

        let result = peer.get_prompt(params).await.map_err(McpError::from)?;

        Ok(PromptContent::from_rmcp(&result))
    }

    async fn refresh_tools_cache(&self) {
        let tools = self.servers.all_tools().await;
        *self.tools_cache.write().await = tools;
    }

    /// Get the server manager (for direct registry inspection).
    #[must_use]
    pub fn server_manager(&self) -> &ServerManager {
        &self.servers
    }

    /// Status snapshots for every connection slot.
    pub async fn server_statuses(&self) -> Vec<McpServerStatus> {
        self.servers.server_statuses().await
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = McpClient::with_config(ServersConfig::default());

        assert!(client.list_tools().await.is_empty());
        assert!(client.server_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_tool_not_found() {
        let client = McpClient::with_config(ServersConfig::default());
        assert!(client.get_tool("server", "tool").await.is_none());
    }

    #[tokio::test]
    async fn connect_unconfigured_server_errors() {
        let client = McpClient::with_config(ServersConfig::default());
        let err = client
            .connect(&SessionId::global(), "nonexistent")
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ServerNotFound { .. }));
    }
}
