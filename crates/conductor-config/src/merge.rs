//! Base + workspace-override merge for MCP server configuration.
//!
//! Merging operates on raw `toml::Value` trees rather than deserialized
//! structs so that a field absent from the override file is indistinguishable
//! from "not specified" rather than "explicitly set to its default" -- a
//! workspace file that omits `auto_start` must not reset a base-level `true`
//! back to `false`.

use tracing::warn;

/// Fields a workspace-level override can only narrow or leave alone, never
/// widen: the command actually run, its arguments and environment, its
/// working directory, the binary hash pinned for verification, and whether
/// the server is trusted to run natively.
pub const PROTECTED_SERVER_FIELDS: &[&str] = &["command", "args", "env", "cwd", "binary_hash", "trusted"];

/// Recursively merge `overlay` into `base`. Tables merge field-by-field;
/// scalars and arrays from `overlay` replace the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_table.insert(key.clone(), overlay_val.clone());
                    },
                }
            }
        },
        (base, overlay) => *base = overlay.clone(),
    }
}

/// For every server table present in both `base` and `overlay`, reset any
/// [`PROTECTED_SERVER_FIELDS`] the overlay attempted to change back to the
/// base value, logging a warning per discarded attempt. Servers the overlay
/// adds that aren't in `base` at all are left untouched -- protection only
/// applies to narrowing an already-trusted definition, not to a workspace
/// defining its own new server.
pub fn sanitize_workspace_servers(base: &toml::Value, overlay: &mut toml::Value) {
    let Some(base_servers) = base.get("servers").and_then(toml::Value::as_table) else {
        return;
    };
    let Some(overlay_servers) = overlay.get_mut("servers").and_then(toml::Value::as_table_mut) else {
        return;
    };

    for (name, overlay_server) in overlay_servers.iter_mut() {
        let Some(base_server) = base_servers.get(name) else {
            continue;
        };
        let Some(overlay_table) = overlay_server.as_table_mut() else {
            continue;
        };
        let Some(base_table) = base_server.as_table() else {
            continue;
        };

        for field in PROTECTED_SERVER_FIELDS {
            let Some(overlay_value) = overlay_table.get(*field) else {
                continue;
            };
            match base_table.get(*field) {
                Some(base_value) if base_value == overlay_value => {},
                Some(base_value) => {
                    warn!(server = %name, field = %field, "workspace override attempted to widen a protected field; discarding");
                    overlay_table.insert((*field).to_string(), base_value.clone());
                },
                None => {
                    warn!(server = %name, field = %field, "workspace override set a protected field absent from the base definition; discarding");
                    overlay_table.remove(*field);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_value(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn deep_merge_replaces_scalars_and_merges_tables() {
        let mut base = toml_value("[servers.fs]\ncommand = \"npx\"\nauto_start = false\n");
        let overlay = toml_value("[servers.fs]\nauto_start = true\n");
        deep_merge(&mut base, &overlay);
        assert_eq!(base["servers"]["fs"]["command"].as_str(), Some("npx"));
        assert_eq!(base["servers"]["fs"]["auto_start"].as_bool(), Some(true));
    }

    #[test]
    fn sanitize_discards_widened_protected_field() {
        let base = toml_value("[servers.fs]\ncommand = \"npx\"\ntrusted = false\n");
        let mut overlay = toml_value("[servers.fs]\ncommand = \"rm -rf /\"\ntrusted = true\n");
        sanitize_workspace_servers(&base, &mut overlay);
        assert_eq!(overlay["servers"]["fs"]["command"].as_str(), Some("npx"));
        assert_eq!(overlay["servers"]["fs"]["trusted"].as_bool(), Some(false));
    }

    #[test]
    fn sanitize_leaves_new_server_untouched() {
        let base = toml_value("[servers.fs]\ncommand = \"npx\"\n");
        let mut overlay = toml_value("[servers.other]\ncommand = \"anything\"\n");
        sanitize_workspace_servers(&base, &mut overlay);
        assert_eq!(overlay["servers"]["other"]["command"].as_str(), Some("anything"));
    }
}
