//! Structural validation of a loaded [`ServersConfig`].

use conductor_mcp::{ServersConfig, Transport};

use crate::error::{ConfigError, ConfigResult};

/// Check every server definition is internally consistent: a `stdio` server
/// names a command, an `sse` server names a URL, and `binary_hash` (if set)
/// looks like a `sha256:` digest.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] naming the first offending server.
pub fn validate(config: &ServersConfig) -> ConfigResult<()> {
    for (name, server) in &config.servers {
        match server.transport {
            Transport::Stdio if server.command.is_none() => {
                return Err(ConfigError::Validation(format!("server '{name}' uses stdio transport but has no command")));
            },
            Transport::Sse if server.url.is_none() => {
                return Err(ConfigError::Validation(format!("server '{name}' uses sse transport but has no url")));
            },
            _ => {},
        }
        if let Some(hash) = &server.binary_hash {
            if !hash.starts_with("sha256:") {
                return Err(ConfigError::Validation(format!(
                    "server '{name}' has a malformed binary_hash: expected a sha256: digest"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_mcp::ServerConfig;

    #[test]
    fn rejects_stdio_server_without_command() {
        let mut config = ServersConfig::default();
        let mut server = ServerConfig::stdio("fs", "npx");
        server.command = None;
        config.add(server);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let mut config = ServersConfig::default();
        config.add(ServerConfig::stdio("fs", "npx"));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_malformed_binary_hash() {
        let mut config = ServersConfig::default();
        config.add(ServerConfig::stdio("fs", "npx").with_hash("not-a-hash"));
        assert!(validate(&config).is_err());
    }
}
