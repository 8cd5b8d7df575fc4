//! Per-agent runtime overrides applied on top of a loaded [`ServersConfig`]:
//! replacing argument values and appending environment entries, without
//! touching the on-disk configuration.

use std::collections::HashMap;

use conductor_mcp::{ServerConfig, ServersConfig};

/// One server's runtime overrides for a single agent/call.
#[derive(Debug, Clone, Default)]
pub struct ServerOverride {
    /// Argument values to replace, by index into the base config's `args`.
    pub arg_replacements: HashMap<usize, String>,
    /// Environment entries to append (layered on top of the base config's own).
    pub env_additions: HashMap<String, String>,
}

impl ServerOverride {
    /// Apply this override to a copy of `base`, returning the derived config.
    #[must_use]
    pub fn apply(&self, base: &ServerConfig) -> ServerConfig {
        let mut derived = base.clone();
        for (index, value) in &self.arg_replacements {
            if let Some(slot) = derived.args.get_mut(*index) {
                *slot = value.clone();
            }
        }
        derived.env.extend(self.env_additions.clone());
        derived
    }
}

/// A per-agent map of server-name -> override, applied at call time rather
/// than persisted to disk.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    per_server: HashMap<String, ServerOverride>,
}

impl RuntimeOverrides {
    /// An empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the override for one server.
    pub fn set(&mut self, server_name: impl Into<String>, server_override: ServerOverride) {
        self.per_server.insert(server_name.into(), server_override);
    }

    /// Apply every configured override to `config`, returning a derived
    /// copy. Servers without a registered override pass through unchanged.
    #[must_use]
    pub fn apply(&self, config: &ServersConfig) -> ServersConfig {
        let mut derived = config.clone();
        for (name, server_override) in &self.per_server {
            if let Some(server) = derived.servers.get(name) {
                let applied = server_override.apply(server);
                derived.servers.insert(name.clone(), applied);
            }
        }
        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_arg_and_appends_env() {
        let base = ServerConfig::stdio("fs", "npx").with_args(["-y", "mcp-fs", "/tmp"]).with_env("A", "1");
        let mut config = ServersConfig::default();
        config.add(base);

        let mut server_override = ServerOverride::default();
        server_override.arg_replacements.insert(2, "/home/user".to_string());
        server_override.env_additions.insert("B".to_string(), "2".to_string());
        let mut overrides = RuntimeOverrides::new();
        overrides.set("fs", server_override);

        let derived = overrides.apply(&config);
        let fs = derived.get("fs").unwrap();
        assert_eq!(fs.args[2], "/home/user");
        assert_eq!(fs.env.get("B"), Some(&"2".to_string()));
        assert_eq!(fs.env.get("A"), Some(&"1".to_string()));
    }

    #[test]
    fn server_without_override_passes_through() {
        let mut config = ServersConfig::default();
        config.add(ServerConfig::stdio("fs", "npx"));
        let derived = RuntimeOverrides::new().apply(&config);
        assert_eq!(derived.get("fs").unwrap().command.as_deref(), Some("npx"));
    }
}
