//! Base + workspace two-layer loading of MCP server configuration.

use std::path::{Path, PathBuf};

use conductor_mcp::ServersConfig;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{deep_merge, sanitize_workspace_servers};

/// Load `base_path` (or the default system location, if `None` and it
/// exists), then, if `workspace_path` exists, merge it in with
/// [`sanitize_workspace_servers`] applied first so a workspace file can
/// never widen a protected field.
///
/// # Errors
///
/// Returns an error if either file exists but fails to parse, or the merged
/// result doesn't match [`ServersConfig`]'s shape.
pub fn load_layered(base_path: Option<&Path>, workspace_path: Option<&Path>) -> ConfigResult<ServersConfig> {
    let base_value = match base_path {
        Some(path) => read_toml(path)?,
        None => match default_path() {
            Ok(path) if path.exists() => read_toml(&path)?,
            _ => toml::Value::Table(toml::map::Map::new()),
        },
    };

    let merged_value = match workspace_path {
        Some(path) if path.exists() => {
            let mut overlay = read_toml(path)?;
            sanitize_workspace_servers(&base_value, &mut overlay);
            let mut merged = base_value;
            deep_merge(&mut merged, &overlay);
            merged
        },
        _ => base_value,
    };

    let mut config =
        ServersConfig::deserialize(merged_value).map_err(|e| ConfigError::Validation(e.to_string()))?;
    for (name, server) in &mut config.servers {
        server.name.clone_from(name);
    }
    Ok(config)
}

fn read_toml(path: &Path) -> ConfigResult<toml::Value> {
    let content =
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// The default system config path (`~/.config/conductor/servers.toml`).
///
/// # Errors
///
/// Returns an error if the configuration directory cannot be determined.
pub fn default_path() -> ConfigResult<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "conductor").ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join("servers.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn merges_workspace_over_base_while_protecting_fields() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_temp(
            &dir,
            "base.toml",
            "[servers.fs]\ncommand = \"npx\"\nargs = [\"-y\", \"mcp-fs\"]\nauto_start = false\n",
        );
        let workspace =
            write_temp(&dir, "workspace.toml", "[servers.fs]\ncommand = \"malicious\"\nauto_start = true\n");

        let config = load_layered(Some(&base), Some(&workspace)).unwrap();
        let fs = config.get("fs").unwrap();
        assert_eq!(fs.command.as_deref(), Some("npx"));
        assert!(fs.auto_start);
    }

    #[test]
    fn missing_workspace_file_falls_back_to_base_only() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_temp(&dir, "base.toml", "[servers.fs]\ncommand = \"npx\"\n");
        let missing = dir.path().join("nonexistent.toml");

        let config = load_layered(Some(&base), Some(&missing)).unwrap();
        assert_eq!(config.get("fs").unwrap().command.as_deref(), Some("npx"));
    }

    #[test]
    fn workspace_can_add_a_new_server() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_temp(&dir, "base.toml", "[servers.fs]\ncommand = \"npx\"\n");
        let workspace = write_temp(&dir, "workspace.toml", "[servers.extra]\ncommand = \"anything\"\n");

        let config = load_layered(Some(&base), Some(&workspace)).unwrap();
        assert!(config.get("fs").is_some());
        assert_eq!(config.get("extra").unwrap().command.as_deref(), Some("anything"));
    }
}
