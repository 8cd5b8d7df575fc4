//! Tool Catalog (C3): holds every discovered tool, enforces global name
//! uniqueness, and exports the active, filtered set the model sees.

use std::collections::HashMap;

use conductor_llm::LlmToolDefinition;
use conductor_mcp::ToolDefinition as McpToolDefinition;
use tracing::warn;

use crate::descriptor::{CustomTool, ToolDescriptor, ToolKind};
use crate::error::{CatalogError, CatalogResult};
use crate::filter::ToolFilter;

/// Holds every tool known to an agent: MCP-discovered, built-in virtual, and
/// host-registered custom.
///
/// Names are globally unique within one catalog. Registering a duplicate
/// name logs a warning and drops the second occurrence, per the catalog's
/// uniqueness invariant.
#[derive(Default)]
pub struct ToolCatalog {
    descriptors: HashMap<String, ToolDescriptor>,
    tool_to_server: HashMap<String, String>,
    custom_tools: HashMap<String, CustomTool>,
    order: Vec<String>,
}

impl ToolCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool discovered from MCP `list_tools`.
    pub fn register_mcp(&mut self, tool: &McpToolDefinition) {
        let descriptor = ToolDescriptor::mcp(
            tool.name.clone(),
            tool.server.clone(),
            tool.description.clone().unwrap_or_default(),
            tool.input_schema.clone(),
        );
        self.insert(descriptor);
        self.tool_to_server.insert(tool.name.clone(), tool.server.clone());
    }

    /// Insert a built-in virtual tool descriptor (no executor: virtual tools
    /// are dispatched by name in [`crate::virtual_tools`]).
    pub fn register_virtual(&mut self, descriptor: ToolDescriptor) {
        debug_assert_eq!(descriptor.kind, ToolKind::Virtual);
        self.insert(descriptor);
    }

    /// Register a host-supplied custom tool.
    ///
    /// Re-registering the same name is idempotent: it replaces the previous
    /// entry rather than being reported as a duplicate.
    pub fn register_custom(&mut self, tool: CustomTool) {
        let name = tool.descriptor.name.clone();
        if !self.descriptors.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.descriptors.insert(name.clone(), tool.descriptor.clone());
        self.custom_tools.insert(name, tool);
    }

    fn insert(&mut self, descriptor: ToolDescriptor) {
        if self.descriptors.contains_key(&descriptor.name) {
            warn!(tool = %descriptor.name, "duplicate tool name across servers; dropping second occurrence");
            return;
        }
        self.order.push(descriptor.name.clone());
        self.descriptors.insert(descriptor.name.clone(), descriptor);
    }

    /// Look up a descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.descriptors.get(name)
    }

    /// Look up the custom-tool executor for `name`, if it is a custom tool.
    #[must_use]
    pub fn get_custom(&self, name: &str) -> Option<&CustomTool> {
        self.custom_tools.get(name)
    }

    /// The server a named MCP tool belongs to.
    #[must_use]
    pub fn server_for(&self, tool_name: &str) -> Option<&str> {
        self.tool_to_server.get(tool_name).map(String::as_str)
    }

    /// Every descriptor in registration order.
    pub fn all(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.order.iter().filter_map(move |name| self.descriptors.get(name))
    }

    /// Resolve whether `name` exists in the catalog at all.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::ToolNotFound`] if absent.
    pub fn require(&self, name: &str) -> CatalogResult<&ToolDescriptor> {
        self.descriptors
            .get(name)
            .ok_or_else(|| CatalogError::ToolNotFound(name.to_string()))
    }

    /// The subset of descriptors admitted by `filter`, in registration order.
    pub fn filtered(&self, filter: &ToolFilter) -> Vec<ToolDescriptor> {
        self.all().filter(|d| filter.admits(d)).cloned().collect()
    }

    /// Convert a set of descriptors into the wire shape the LLM call expects.
    #[must_use]
    pub fn to_llm_definitions(descriptors: &[ToolDescriptor]) -> Vec<LlmToolDefinition> {
        descriptors
            .iter()
            .map(|d| {
                LlmToolDefinition::new(d.name.clone())
                    .with_description(d.description.clone())
                    .with_schema(d.json_schema_parameters.clone())
            })
            .collect()
    }

    /// Number of tools currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the catalog holds no tools at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn mcp_tool(server: &str, name: &str) -> McpToolDefinition {
        let mut tool = McpToolDefinition::new(name, server);
        tool.description = Some("d".to_string());
        tool.input_schema = Value::Null;
        tool
    }

    #[test]
    fn register_and_lookup_mcp_tool() {
        let mut catalog = ToolCatalog::new();
        catalog.register_mcp(&mcp_tool("fs", "read_file"));
        assert!(catalog.get("read_file").is_some());
        assert_eq!(catalog.server_for("read_file"), Some("fs"));
    }

    #[test]
    fn duplicate_names_across_servers_drop_second_occurrence() {
        let mut catalog = ToolCatalog::new();
        catalog.register_mcp(&mcp_tool("fs", "read_file"));
        catalog.register_mcp(&mcp_tool("other", "read_file"));
        assert_eq!(catalog.server_for("read_file"), Some("fs"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn custom_registration_is_idempotent_by_name() {
        let mut catalog = ToolCatalog::new();
        let exec: crate::descriptor::CustomToolExecutor =
            std::sync::Arc::new(|_| Box::pin(async { Ok(String::new()) }));
        let d1 = ToolDescriptor::custom("calc", "v1", Value::Null, "math");
        let d2 = ToolDescriptor::custom("calc", "v2", Value::Null, "math");
        catalog.register_custom(CustomTool::new(d1, exec.clone()).unwrap());
        catalog.register_custom(CustomTool::new(d2, exec).unwrap());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("calc").unwrap().description, "v2");
    }

    #[test]
    fn require_missing_tool_errors() {
        let catalog = ToolCatalog::new();
        assert!(catalog.require("nope").is_err());
    }

    #[test]
    fn filtered_respects_filter() {
        let mut catalog = ToolCatalog::new();
        catalog.register_mcp(&mcp_tool("fs", "read_file"));
        catalog.register_mcp(&mcp_tool("web", "fetch"));
        let filter = ToolFilter {
            selected_servers: vec!["fs".to_string()],
            ..Default::default()
        };
        let active = catalog.filtered(&filter);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "read_file");
    }
}
