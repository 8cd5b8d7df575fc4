//! MCP server lifecycle management: the Session Connection Registry.
//!
//! Connections are keyed by `(effective_session, server_name)`. A server's
//! `stateless` flag decides what "effective session" means: stateless
//! servers are keyed by the caller's real session id, everything else is
//! forced into the shared `"global"` session so unrelated agents reuse one
//! connection per server. Entries are ref-counted; broken-pipe recovery
//! atomically swaps a dead entry for a fresh one under the same key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::ServiceExt;
use rmcp::model::{ClientCapabilities, ClientInfo, Implementation, ProtocolVersion};
use rmcp::service::{NotificationContext, Peer, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use conductor_core::SessionId;

use crate::config::{RestartPolicy, ServerConfig, ServersConfig, Transport};
use crate::error::{McpError, McpResult};
use crate::types::{ServerInfo, ToolDefinition};

/// Minimal bridge between the conductor and the rmcp `ClientHandler` trait.
///
/// This crate does not implement the Nov-2025 MCP capability surface
/// (sampling, roots, elicitation) -- those requests get rmcp's built-in
/// "not supported" default response. `get_info` is the only method this
/// implementation needs to override.
struct ConductorClientHandler;

impl rmcp::ClientHandler for ConductorClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            meta: None,
            protocol_version: ProtocolVersion::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "conductor".to_string(),
                title: Some("Conductor agent runtime".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
        }
    }

    async fn on_tool_list_changed(&self, context: NotificationContext<RoleClient>) {
        // Best-effort: re-fetch happens lazily on the next list_tools/call_tool
        // round instead of being pushed, so just log that the server moved.
        let _ = context;
        info!("Received tools/list_changed notification");
    }
}

type McpService = RunningService<RoleClient, ConductorClientHandler>;

/// Key identifying one connection slot in the registry.
type ConnKey = (String, String);

/// A running MCP server instance bound to one connection-registry slot.
pub(crate) struct RunningServer {
    /// Server configuration.
    pub config: ServerConfig,
    /// Running rmcp service (handles child process lifecycle).
    service: Option<McpService>,
    /// Server info after initialization.
    pub info: Option<ServerInfo>,
    /// Available tools.
    pub tools: Vec<ToolDefinition>,
    /// Whether the server is connected and ready.
    pub ready: bool,
    /// Number of callers sharing this connection slot.
    pub ref_count: u32,
    /// How many times this slot has been restarted.
    pub restart_count: u32,
    /// When the last restart attempt was made (for backoff calculations).
    pub last_restart_attempt: Option<Instant>,
}

impl RunningServer {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            service: None,
            info: None,
            tools: Vec::new(),
            ready: false,
            ref_count: 0,
            restart_count: 0,
            last_restart_attempt: None,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match &self.service {
            Some(svc) => !svc.is_closed(),
            None => false,
        }
    }

    pub(crate) fn peer(&self) -> Option<Peer<RoleClient>> {
        self.service.as_ref().map(|svc| svc.peer().clone())
    }
}

/// Status snapshot for a single connection slot (used for reporting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerStatus {
    /// Server name.
    pub name: String,
    /// Effective session key this slot is bound to.
    pub session: String,
    /// Whether the server process is alive.
    pub alive: bool,
    /// Whether the server has completed the MCP handshake and is ready.
    pub ready: bool,
    /// Number of tools provided by this server.
    pub tool_count: usize,
    /// Number of callers sharing this slot.
    pub ref_count: u32,
    /// How many times this slot has been restarted.
    pub restart_count: u32,
    /// Human-readable description.
    pub description: Option<String>,
}

/// The process-global Session Connection Registry.
///
/// `init` is [`ServerManager::new`] / [`ServerManager::from_default_config`];
/// `close_all` is [`ServerManager::stop_all`]. Between those, connection
/// slots are created lazily via [`ServerManager::get_or_create`] and torn
/// down individually via [`ServerManager::release`] or
/// [`ServerManager::recover`] (broken-pipe replacement).
pub struct ServerManager {
    configs: ServersConfig,
    running: Arc<RwLock<HashMap<ConnKey, RunningServer>>>,
    shutdown_timeout: Duration,
}

impl ServerManager {
    /// Create a new server manager.
    #[must_use]
    pub fn new(configs: ServersConfig) -> Self {
        let shutdown_timeout = configs.shutdown_timeout;
        Self {
            configs,
            running: Arc::new(RwLock::new(HashMap::new())),
            shutdown_timeout,
        }
    }

    /// Create from default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded.
    pub fn from_default_config() -> McpResult<Self> {
        Ok(Self::new(ServersConfig::load_default()?))
    }

    /// Get server configuration by name.
    #[must_use]
    pub fn get_config(&self, name: &str) -> Option<&ServerConfig> {
        self.configs.get(name)
    }

    /// List all configured servers.
    #[must_use]
    pub fn list_configured(&self) -> Vec<&str> {
        self.configs.list()
    }

    /// The session key a connection to `name` is actually stored under, given
    /// the caller's session and the server's `stateless` flag.
    fn effective_session(&self, name: &str, session: &SessionId) -> String {
        match self.configs.get(name) {
            Some(cfg) if cfg.stateless => session.as_str().to_string(),
            _ => SessionId::global().as_str().to_string(),
        }
    }

    /// Whether a connection slot exists for `(session, name)`.
    pub async fn is_running(&self, session: &SessionId, name: &str) -> bool {
        let key = (self.effective_session(name, session), name.to_string());
        self.running.read().await.contains_key(&key)
    }

    /// Get or create a shared connection for `(session, name)`, incrementing
    /// its reference count.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unconfigured, binary verification
    /// fails, or the MCP handshake fails.
    pub async fn get_or_create(&self, session: &SessionId, name: &str) -> McpResult<Peer<RoleClient>> {
        let key = (self.effective_session(name, session), name.to_string());

        {
            let mut running = self.running.write().await;
            if let Some(server) = running.get_mut(&key) {
                if let Some(peer) = server.peer() {
                    server.ref_count = server.ref_count.saturating_add(1);
                    return Ok(peer);
                }
            }
        }

        self.connect_new(&key, name).await
    }

    /// Release one reference to a connection slot. The connection itself is
    /// left open for reuse; actual teardown only happens via
    /// [`ServerManager::stop`] / [`ServerManager::stop_all`].
    pub async fn release(&self, session: &SessionId, name: &str) {
        let key = (self.effective_session(name, session), name.to_string());
        let mut running = self.running.write().await;
        if let Some(server) = running.get_mut(&key) {
            server.ref_count = server.ref_count.saturating_sub(1);
        }
    }

    /// Spawn the child process, perform the MCP handshake, fetch the tool
    /// list, and insert a fresh `RunningServer` at `key`.
    async fn connect_new(&self, key: &ConnKey, name: &str) -> McpResult<Peer<RoleClient>> {
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| McpError::ServerNotFound {
                name: name.to_string(),
            })?
            .clone();

        config.verify_binary()?;

        match config.transport {
            Transport::Stdio => {},
            Transport::Sse => {
                return Err(McpError::ConfigError(
                    "SSE transport not yet supported; enable `transport-streamable-http-client` \
                     feature in rmcp"
                        .to_string(),
                ));
            },
        }

        let command = config.command.as_ref().ok_or_else(|| {
            McpError::ConfigError(format!("No command specified for stdio server {name}"))
        })?;

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(&config.args);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| McpError::ServerStartFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let service = ConductorClientHandler.serve(transport).await.map_err(|e| {
            McpError::InitializationFailed(format!("MCP handshake failed for {name}: {e}"))
        })?;

        let server_info = service
            .peer_info()
            .map(|info| ServerInfo::from_rmcp(info, name));

        let rmcp_tools = service.list_all_tools().await.map_err(McpError::from)?;
        let tools: Vec<ToolDefinition> = rmcp_tools
            .iter()
            .map(|t| ToolDefinition::from_rmcp(t, name))
            .collect();

        info!(
            server = name,
            session = %key.0,
            tool_count = tools.len(),
            "MCP connection established"
        );

        let peer = service.peer().clone();

        let mut running = self.running.write().await;
        let mut entry = running.remove(key).unwrap_or_else(|| RunningServer::new(config));
        entry.service = Some(service);
        entry.info = server_info;
        entry.tools = tools;
        entry.ready = true;
        entry.ref_count = entry.ref_count.saturating_add(1);
        running.insert(key.clone(), entry);

        Ok(peer)
    }

    /// Get a cloneable peer handle for an already-connected slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist or is not connected.
    pub async fn get_peer(&self, session: &SessionId, name: &str) -> McpResult<Peer<RoleClient>> {
        let key = (self.effective_session(name, session), name.to_string());
        let running = self.running.read().await;
        let server = running
            .get(&key)
            .ok_or_else(|| McpError::ServerNotRunning {
                name: name.to_string(),
            })?;

        server.peer().ok_or_else(|| {
            McpError::ConnectionFailed(format!("Server {name} is registered but not connected"))
        })
    }

    /// Stop one connection slot, closing the MCP session gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist.
    pub async fn stop(&self, session: &SessionId, name: &str) -> McpResult<()> {
        let key = (self.effective_session(name, session), name.to_string());
        let mut running = self.running.write().await;

        let mut server = running
            .remove(&key)
            .ok_or_else(|| McpError::ServerNotRunning {
                name: name.to_string(),
            })?;

        info!(server = name, session = %key.0, "Stopping MCP server");

        if let Some(ref mut service) = server.service {
            match service.close_with_timeout(self.shutdown_timeout).await {
                Ok(Some(reason)) => {
                    info!(server = name, ?reason, "MCP session closed gracefully");
                },
                Ok(None) => {
                    warn!(
                        server = name,
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "MCP session close timed out; dropping"
                    );
                },
                Err(e) => {
                    warn!(server = name, error = %e, "MCP session close join error");
                },
            }
        }

        drop(server);
        Ok(())
    }

    /// Stop all connection slots.
    pub async fn stop_all(&self) -> McpResult<()> {
        let keys: Vec<ConnKey> = { self.running.read().await.keys().cloned().collect() };

        for (session, name) in keys {
            if let Err(e) = self.stop(&SessionId::new(session), &name).await {
                warn!(server = name, error = %e, "Failed to stop server");
            }
        }

        Ok(())
    }

    /// Connect all servers flagged `auto_start` into the shared global session.
    pub async fn start_auto_servers(&self) -> McpResult<()> {
        let global = SessionId::global();
        let names: Vec<String> = self
            .configs
            .auto_start_servers()
            .iter()
            .map(|c| c.name.clone())
            .collect();

        for name in names {
            if let Err(e) = self.get_or_create(&global, &name).await {
                warn!(server = name, error = %e, "Failed to auto-start server");
            }
        }

        Ok(())
    }

    /// All tools from all currently connected slots.
    pub async fn all_tools(&self) -> Vec<ToolDefinition> {
        self.running
            .read()
            .await
            .values()
            .flat_map(|s| s.tools.clone())
            .collect()
    }

    /// Liveness of every connection slot.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        self.running
            .read()
            .await
            .iter()
            .map(|((session, name), s)| (format!("{name}@{session}"), s.is_alive()))
            .collect()
    }

    /// Status snapshots for every connection slot.
    pub async fn server_statuses(&self) -> Vec<McpServerStatus> {
        self.running
            .read()
            .await
            .iter()
            .map(|((session, _), s)| McpServerStatus {
                name: s.config.name.clone(),
                session: session.clone(),
                alive: s.is_alive(),
                ready: s.ready,
                tool_count: s.tools.len(),
                ref_count: s.ref_count,
                restart_count: s.restart_count,
                description: s.config.description.clone(),
            })
            .collect()
    }

    /// Backoff schedule for restart attempts: 30s base, 5 min cap, base 2.
    fn restart_backoff() -> RetryBackoff {
        RetryBackoff::new(Duration::from_secs(30), Duration::from_secs(300), 2.0)
    }

    /// Atomically check the restart policy and recover the connection if
    /// allowed, replacing the stale entry under the same key.
    ///
    /// Holds the write lock across the policy check and the `remove()`, so
    /// two concurrent callers can't both pass the retry-limit check for the
    /// same slot; the lock is released before the slow I/O (process spawn +
    /// handshake).
    ///
    /// Returns `Ok(true)` if recovery happened, `Ok(false)` if the policy
    /// forbids it right now (exhausted retries or still in the cooldown
    /// window).
    ///
    /// # Errors
    ///
    /// Returns an error if recovery itself fails (start or handshake).
    pub async fn recover(&self, session: &SessionId, name: &str) -> McpResult<bool> {
        let Some(config) = self.configs.get(name) else {
            return Ok(false);
        };
        let restart_policy = config.restart_policy.clone();

        let key = (self.effective_session(name, session), name.to_string());
        let backoff = Self::restart_backoff();

        let prev_count = {
            let mut running = self.running.write().await;
            let (count, last_attempt) = running
                .get(&key)
                .map_or((0, None), |s| (s.restart_count, s.last_restart_attempt));

            let allowed = match &restart_policy {
                RestartPolicy::Never => false,
                RestartPolicy::OnFailure { max_retries } => count < *max_retries,
                RestartPolicy::Always => true,
            };
            if !allowed {
                return Ok(false);
            }

            if let Some(last) = last_attempt {
                if last.elapsed() < backoff.delay_for_attempt(count) {
                    return Ok(false);
                }
            }

            // Remove while still holding the write lock: a concurrent
            // recover() call for the same key now sees no entry and will
            // re-create it fresh rather than double-restart.
            running.remove(&key);
            count
        };

        // Lock released; reconnect is the slow path (process spawn + handshake).
        self.connect_new(&key, name).await?;

        let new_count = prev_count.saturating_add(1);
        {
            let mut running = self.running.write().await;
            if let Some(server) = running.get_mut(&key) {
                server.restart_count = new_count;
                server.last_restart_attempt = Some(Instant::now());
            }
        }

        info!(
            server = name,
            session = %key.0,
            restart_count = new_count,
            "Connection recovered after broken pipe"
        );
        Ok(true)
    }

    /// Names configured for auto-start.
    #[must_use]
    pub fn list_auto_start_names(&self) -> Vec<String> {
        self.configs
            .auto_start_servers()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Number of live connection slots.
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Number of configured servers.
    #[must_use]
    pub fn configured_count(&self) -> usize {
        self.configs.servers.len()
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("configured_servers", &self.configs.list())
            .finish_non_exhaustive()
    }
}

/// A small, self-contained exponential backoff calculator.
///
/// Grounded on the teacher's general-purpose `RetryConfig`, trimmed to just
/// the delay schedule this crate needs (the restart-attempt cap lives in
/// `RestartPolicy`, not here).
struct RetryBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
}

impl RetryBackoff {
    fn new(initial_delay: Duration, max_delay: Duration, exponential_base: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            exponential_base,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay_ms =
            self.initial_delay.as_millis() as f64 * self.exponential_base.powi(exponent);
        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_delay_ms.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_manager_creation() {
        let manager = ServerManager::new(ServersConfig::default());
        assert!(manager.list_configured().is_empty());
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_is_running_false_when_unconfigured() {
        let manager = ServerManager::new(ServersConfig::default());
        assert!(!manager.is_running(&SessionId::global(), "test").await);
    }

    #[test]
    fn restart_backoff_delays_are_exponential() {
        let backoff = ServerManager::restart_backoff();

        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(60));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(120));
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_secs(240));
        // attempt 5 = 30 * 16 = 480s, capped at 300s.
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(300));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn recover_returns_false_when_unconfigured() {
        let manager = ServerManager::new(ServersConfig::default());
        let recovered = manager.recover(&SessionId::global(), "nope").await.unwrap();
        assert!(!recovered);
    }

    #[tokio::test]
    async fn recover_respects_never_restart_policy() {
        let mut configs = ServersConfig::default();
        configs.add(ServerConfig::stdio("srv", "cmd").with_restart_policy(RestartPolicy::Never));
        let manager = ServerManager::new(configs);

        let recovered = manager.recover(&SessionId::global(), "srv").await.unwrap();
        assert!(!recovered);
    }

    #[tokio::test]
    async fn recover_respects_backoff_cooldown() {
        let mut configs = ServersConfig::default();
        configs.add(ServerConfig::stdio("srv", "cmd").with_restart_policy(RestartPolicy::Always));
        let manager = ServerManager::new(configs);

        {
            let mut running = manager.running.write().await;
            let mut server = RunningServer::new(
                ServerConfig::stdio("srv", "cmd").with_restart_policy(RestartPolicy::Always),
            );
            server.restart_count = 1;
            server.last_restart_attempt = Some(Instant::now());
            running.insert(("global".to_string(), "srv".to_string()), server);
        }

        // Cooldown for restart_count=1 is 30s; it just happened, so no retry yet.
        let recovered = manager.recover(&SessionId::global(), "srv").await.unwrap();
        assert!(!recovered);
    }

    #[tokio::test]
    async fn recover_respects_max_retries_on_failure_policy() {
        let mut configs = ServersConfig::default();
        configs.add(
            ServerConfig::stdio("srv", "cmd")
                .with_restart_policy(RestartPolicy::OnFailure { max_retries: 2 }),
        );
        let manager = ServerManager::new(configs);

        {
            let mut running = manager.running.write().await;
            let mut server = RunningServer::new(
                ServerConfig::stdio("srv", "cmd")
                    .with_restart_policy(RestartPolicy::OnFailure { max_retries: 2 }),
            );
            server.restart_count = 2;
            running.insert(("global".to_string(), "srv".to_string()), server);
        }

        let recovered = manager.recover(&SessionId::global(), "srv").await.unwrap();
        assert!(!recovered);
    }

    #[tokio::test]
    async fn stateless_server_is_keyed_by_real_session() {
        let mut configs = ServersConfig::default();
        configs.add(ServerConfig::stdio("playwright", "cmd").stateless());
        let manager = ServerManager::new(configs);

        let key = manager.effective_session("playwright", &SessionId::new("workflow-7"));
        assert_eq!(key, "workflow-7");
    }

    #[tokio::test]
    async fn stateful_default_server_is_forced_global() {
        let mut configs = ServersConfig::default();
        configs.add(ServerConfig::stdio("filesystem", "cmd"));
        let manager = ServerManager::new(configs);

        let key = manager.effective_session("filesystem", &SessionId::new("workflow-7"));
        assert_eq!(key, "global");
    }
}
