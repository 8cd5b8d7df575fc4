//! Tool filtering: decide which discovered tools are admitted into an agent's
//! active set, given an allowlist of tools/servers/custom-categories.

use crate::descriptor::{ToolDescriptor, ToolKind};

/// An allowlist controlling which tools from the full catalog are admitted.
///
/// An empty filter (`selected_tools` and `selected_servers` both empty)
/// admits everything — this is the common case of "no restriction".
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    /// Explicit `server:tool` entries, or `server:*` wildcards.
    pub selected_tools: Vec<String>,
    /// Servers admitted wholesale (unless narrowed by a `selected_tools` entry).
    pub selected_servers: Vec<String>,
    /// Custom-tool categories admitted.
    pub custom_categories: Vec<String>,
}

impl ToolFilter {
    /// No restriction: every tool is admitted.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Whether `descriptor` is admitted by this filter.
    ///
    /// Rules, evaluated in order:
    /// 1. No restriction at all (`selected_tools` and `selected_servers` both
    ///    empty) admits everything.
    /// 2. An explicit `server:tool` entry admits that exact tool.
    /// 3. A `server:*` wildcard admits every tool from that server.
    /// 4. A server listed in `selected_servers` with no per-tool entry for it
    ///    admits all of its tools.
    /// 5. Virtual tools are always admitted (tool-search mode applies its own
    ///    narrower visibility on top of this).
    /// 6. Custom tools are filtered by category, using `custom_categories` as
    ///    the set of admitted "servers".
    #[must_use]
    pub fn admits(&self, descriptor: &ToolDescriptor) -> bool {
        if self.selected_tools.is_empty() && self.selected_servers.is_empty() {
            return true;
        }

        match descriptor.kind {
            ToolKind::Virtual => true,
            ToolKind::Mcp => {
                let Some(server) = descriptor.server.as_deref() else {
                    return false;
                };
                let exact = format!("{server}:{}", descriptor.name);
                let wildcard = format!("{server}:*");
                if self.selected_tools.iter().any(|t| t == &exact || t == &wildcard) {
                    return true;
                }
                let server_has_tool_entry = self
                    .selected_tools
                    .iter()
                    .any(|t| t.starts_with(&format!("{server}:")));
                self.selected_servers.iter().any(|s| s == server) && !server_has_tool_entry
            },
            ToolKind::Custom => {
                if descriptor.is_always_available() {
                    return true;
                }
                descriptor
                    .category
                    .as_deref()
                    .is_some_and(|cat| self.custom_categories.iter().any(|c| c == cat))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn mcp(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor::mcp(name, server, "d", Value::Null)
    }

    #[test]
    fn empty_filter_admits_everything() {
        let filter = ToolFilter::unrestricted();
        assert!(filter.admits(&mcp("fs", "read_file")));
    }

    #[test]
    fn explicit_tool_entry_admits_only_that_tool() {
        let filter = ToolFilter {
            selected_tools: vec!["fs:read_file".to_string()],
            ..Default::default()
        };
        assert!(filter.admits(&mcp("fs", "read_file")));
        assert!(!filter.admits(&mcp("fs", "write_file")));
        assert!(!filter.admits(&mcp("web", "read_file")));
    }

    #[test]
    fn wildcard_admits_whole_server() {
        let filter = ToolFilter {
            selected_tools: vec!["fs:*".to_string()],
            ..Default::default()
        };
        assert!(filter.admits(&mcp("fs", "read_file")));
        assert!(filter.admits(&mcp("fs", "write_file")));
        assert!(!filter.admits(&mcp("web", "fetch")));
    }

    #[test]
    fn server_in_selected_servers_without_tool_entry_admits_all() {
        let filter = ToolFilter {
            selected_servers: vec!["fs".to_string()],
            ..Default::default()
        };
        assert!(filter.admits(&mcp("fs", "read_file")));
        assert!(!filter.admits(&mcp("web", "fetch")));
    }

    #[test]
    fn selected_servers_narrowed_by_per_tool_entry_for_same_server() {
        // fs has a selected_tools entry, so selected_servers no longer grants
        // blanket admission for fs — only the explicit tool is admitted.
        let filter = ToolFilter {
            selected_tools: vec!["fs:read_file".to_string()],
            selected_servers: vec!["fs".to_string()],
            ..Default::default()
        };
        assert!(filter.admits(&mcp("fs", "read_file")));
        assert!(!filter.admits(&mcp("fs", "write_file")));
    }

    #[test]
    fn virtual_tools_always_admitted() {
        let filter = ToolFilter {
            selected_servers: vec!["fs".to_string()],
            ..Default::default()
        };
        let v = ToolDescriptor::virtual_tool("search_tools", "d", Value::Null);
        assert!(filter.admits(&v));
    }

    #[test]
    fn custom_tools_filtered_by_category() {
        let filter = ToolFilter {
            selected_servers: vec!["fs".to_string()],
            custom_categories: vec!["ops".to_string()],
            ..Default::default()
        };
        let admitted = ToolDescriptor::custom("deploy", "d", Value::Null, "ops");
        let rejected = ToolDescriptor::custom("bill", "d", Value::Null, "finance");
        assert!(filter.admits(&admitted));
        assert!(!filter.admits(&rejected));
    }

    #[test]
    fn always_available_custom_category_bypasses_filter() {
        let filter = ToolFilter {
            selected_servers: vec!["fs".to_string()],
            ..Default::default()
        };
        let d = ToolDescriptor::custom("answer", "d", Value::Null, "structured_output");
        assert!(filter.admits(&d));
    }
}
