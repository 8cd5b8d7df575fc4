//! Built-in virtual tools: offload access, tool-search indirection, and the
//! code-execution discovery seam.
//!
//! Virtual tools never trigger broken-pipe recovery (that's an MCP-only
//! failure mode) and are always dispatched in-process.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use conductor_core::SessionId;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::catalog::ToolCatalog;
use crate::descriptor::ToolDescriptor;
use crate::error::{CatalogError, CatalogResult};
use crate::output_store::ToolOutputStore;
use crate::search::{ADD_TOOL, SEARCH_TOOLS, SHOW_ALL_TOOLS, ToolSearchMode};

/// Names of every virtual tool this crate implements.
pub mod names {
    /// Fetch an MCP prompt by name.
    pub const GET_PROMPT: &str = "get_prompt";
    /// Fetch an MCP resource by URI.
    pub const GET_RESOURCE: &str = "get_resource";
    /// Read back an offloaded tool output in full.
    pub const READ_LARGE_OUTPUT: &str = "read_large_output";
    /// Search an offloaded tool output for a substring.
    pub const SEARCH_LARGE_OUTPUT: &str = "search_large_output";
    /// Run a structured query against an offloaded tool output.
    pub const QUERY_LARGE_OUTPUT: &str = "query_large_output";
    /// Discover candidate files for a code-execution backend.
    pub const DISCOVER_CODE_FILES: &str = "discover_code_files";
    /// Dispatch a code-execution backend call.
    pub const WRITE_CODE: &str = "write_code";
    /// Load an image for inclusion in the next model turn.
    pub const READ_IMAGE: &str = "read_image";
}

/// The host-supplied seam for "code execution mode": the
/// actual code generation/execution runtime is out of scope for this core,
/// represented here by a single trait object.
#[async_trait]
pub trait CodeExecutionBackend: Send + Sync {
    /// List source files relevant to `tool_names` on `server_name`, so the
    /// model can decide what to inspect before writing code against them.
    async fn discover_code_files(&self, server_name: &str, tool_names: &[String]) -> Result<Vec<String>, String>;

    /// Submit `code` for execution with the given positional `args`, and
    /// return its textual result.
    async fn write_code(&self, code: &str, args: &[String]) -> Result<String, String>;
}

/// Every descriptor for the tools always present in tool-search mode: the
/// three indirection tools plus the offload-access virtuals.
#[must_use]
pub fn always_on_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::virtual_tool(
            SEARCH_TOOLS,
            "Search the full tool catalog by name or description. Does not activate matches.",
            json!({"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}),
        ),
        ToolDescriptor::virtual_tool(
            ADD_TOOL,
            "Activate one or more tools found via search_tools so they can be called.",
            json!({"type": "object", "properties": {"tool_names": {"type": "array", "items": {"type": "string"}}}, "required": ["tool_names"]}),
        ),
        ToolDescriptor::virtual_tool(
            SHOW_ALL_TOOLS,
            "List every tool name known to the catalog, active or not.",
            json!({"type": "object", "properties": {}}),
        ),
        ToolDescriptor::virtual_tool(
            names::READ_LARGE_OUTPUT,
            "Read back the full content of a previously offloaded tool output file.",
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        ),
        ToolDescriptor::virtual_tool(
            names::SEARCH_LARGE_OUTPUT,
            "Search an offloaded tool output file for a substring or regular expression.",
            json!({"type": "object", "properties": {"path": {"type": "string"}, "query": {"type": "string"}}, "required": ["path", "query"]}),
        ),
        ToolDescriptor::virtual_tool(
            names::QUERY_LARGE_OUTPUT,
            "Run a jq-style query against an offloaded JSON tool output file.",
            json!({"type": "object", "properties": {"path": {"type": "string"}, "query": {"type": "string"}}, "required": ["path", "query"]}),
        ),
    ]
}

/// Descriptors for `get_prompt`/`get_resource`/`read_image`, registered
/// whenever the corresponding backend is wired in.
#[must_use]
pub fn mcp_bridge_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::virtual_tool(
            names::GET_PROMPT,
            "Fetch a named prompt template from an MCP server.",
            json!({"type": "object", "properties": {"server": {"type": "string"}, "name": {"type": "string"}}, "required": ["server", "name"]}),
        ),
        ToolDescriptor::virtual_tool(
            names::GET_RESOURCE,
            "Fetch a resource by URI from an MCP server.",
            json!({"type": "object", "properties": {"server": {"type": "string"}, "uri": {"type": "string"}}, "required": ["server", "uri"]}),
        ),
        ToolDescriptor::virtual_tool(
            names::READ_IMAGE,
            "Load an image so it is attached to the next turn as a user message.",
            json!({"type": "object", "properties": {"path_or_url": {"type": "string"}}, "required": ["path_or_url"]}),
        ),
    ]
}

/// Descriptors for the code-execution discovery seam, present only when a
/// [`CodeExecutionBackend`] is configured.
#[must_use]
pub fn code_execution_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::virtual_tool(
            names::DISCOVER_CODE_FILES,
            "List source files relevant to a server's tools, before writing code against them.",
            json!({"type": "object", "properties": {"server_name": {"type": "string"}, "tool_names": {"type": "array", "items": {"type": "string"}}}, "required": ["server_name"]}),
        ),
        ToolDescriptor::virtual_tool(
            names::WRITE_CODE,
            "Submit generated code for execution against the configured backend.",
            json!({"type": "object", "properties": {"code": {"type": "string"}, "args": {"type": "array", "items": {"type": "string"}}}, "required": ["code"]}),
        ),
    ]
}

/// Shared state the virtual-tool dispatcher needs: the offload store, the
/// optional tool-search state, and the optional code-execution backend.
///
/// MCP prompt/resource access is intentionally left to the caller (the
/// turn loop already holds an `McpRegistry`); `dispatch` below returns a
/// [`CatalogError::ToolNotFound`] for `get_prompt`/`get_resource` so the
/// conductor can special-case those two before falling through here.
pub struct VirtualToolDispatcher {
    output_store: Arc<ToolOutputStore>,
    search_mode: Option<Arc<RwLock<ToolSearchMode>>>,
    code_backend: Option<Arc<dyn CodeExecutionBackend>>,
}

impl VirtualToolDispatcher {
    /// Build a dispatcher with no tool-search mode and no code-execution backend.
    #[must_use]
    pub fn new(output_store: Arc<ToolOutputStore>) -> Self {
        Self {
            output_store,
            search_mode: None,
            code_backend: None,
        }
    }

    /// Enable tool-search mode.
    #[must_use]
    pub fn with_search_mode(mut self, mode: ToolSearchMode) -> Self {
        self.search_mode = Some(Arc::new(RwLock::new(mode)));
        self
    }

    /// Wire in a code-execution backend.
    #[must_use]
    pub fn with_code_backend(mut self, backend: Arc<dyn CodeExecutionBackend>) -> Self {
        self.code_backend = Some(backend);
        self
    }

    /// Whether tool-search mode is active.
    #[must_use]
    pub fn search_mode_enabled(&self) -> bool {
        self.search_mode.is_some()
    }

    /// The catalog rebuild after a successful `add_tool`: `search_tools +
    /// discovered`. Returns `None` if tool-search mode is inactive.
    pub async fn active_tools(&self) -> Option<Vec<ToolDescriptor>> {
        let mode = self.search_mode.as_ref()?;
        Some(mode.read().await.discovered())
    }

    /// Dispatch one virtual tool call, given `_session` for future
    /// session-scoped offload lookups and `_catalog` for future
    /// description lookups (both accepted now for interface stability; the
    /// current implementation only needs `_session` for offload paths).
    pub async fn dispatch(
        &self,
        session: &SessionId,
        name: &str,
        args: &Value,
        _catalog: &ToolCatalog,
    ) -> CatalogResult<String> {
        match name {
            SEARCH_TOOLS => {
                let mode = self.search_mode.as_ref().ok_or_else(|| CatalogError::ToolNotFound(name.to_string()))?;
                let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
                let hits = mode.read().await.search(query)?;
                Ok(serde_json::to_string(&hits.iter().map(|h| json!({"name": h.name, "description": h.description})).collect::<Vec<_>>())
                    .unwrap_or_default())
            },
            ADD_TOOL => {
                let mode = self.search_mode.as_ref().ok_or_else(|| CatalogError::ToolNotFound(name.to_string()))?;
                let requested: Vec<String> = args
                    .get("tool_names")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                let added = mode.write().await.add_tool(&requested);
                Ok(format!("Activated: {}", added.join(", ")))
            },
            SHOW_ALL_TOOLS => {
                let mode = self.search_mode.as_ref().ok_or_else(|| CatalogError::ToolNotFound(name.to_string()))?;
                Ok(mode.read().await.show_all_tools().join(", "))
            },
            names::READ_LARGE_OUTPUT => {
                let path = require_str(args, "path")?;
                self.output_store
                    .read(&PathBuf::from(path))
                    .await
                    .map_err(CatalogError::from)
            },
            names::SEARCH_LARGE_OUTPUT => {
                let path = require_str(args, "path")?;
                let query = require_str(args, "query")?;
                let content = self.output_store.read(&PathBuf::from(path)).await?;
                let re = regex::RegexBuilder::new(query)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CatalogError::InvalidSearchQuery(e.to_string()))?;
                let matches: Vec<&str> = content.lines().filter(|l| re.is_match(l)).collect();
                Ok(matches.join("\n"))
            },
            names::QUERY_LARGE_OUTPUT => {
                let path = require_str(args, "path")?;
                let query = require_str(args, "query")?;
                let content = self.output_store.read(&PathBuf::from(path)).await?;
                let value: Value = serde_json::from_str(&content)
                    .map_err(|e| CatalogError::Serialization(e.to_string()))?;
                Ok(jq_lite(&value, query))
            },
            names::DISCOVER_CODE_FILES => {
                let backend = self.code_backend.as_ref().ok_or_else(|| CatalogError::ToolNotFound(name.to_string()))?;
                let server_name = require_str(args, "server_name")?;
                let tool_names: Vec<String> = args
                    .get("tool_names")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                backend
                    .discover_code_files(server_name, &tool_names)
                    .await
                    .map(|files| files.join("\n"))
                    .map_err(|reason| CatalogError::CustomToolFailed { tool: name.to_string(), reason })
            },
            names::READ_IMAGE => {
                let path_or_url = require_str(args, "path_or_url")?;
                Ok(serde_json::to_string(&load_image(path_or_url).await?).unwrap_or_default())
            },
            names::WRITE_CODE => {
                let backend = self.code_backend.as_ref().ok_or_else(|| CatalogError::ToolNotFound(name.to_string()))?;
                let code = require_str(args, "code")?;
                let call_args: Vec<String> = args
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                backend
                    .write_code(code, &call_args)
                    .await
                    .map_err(|reason| CatalogError::CustomToolFailed { tool: name.to_string(), reason })
            },
            _ => {
                let _ = session;
                Err(CatalogError::ToolNotFound(name.to_string()))
            },
        }
    }
}

/// Dispatch `get_prompt`/`get_resource` against an MCP registry.
///
/// Kept separate from [`VirtualToolDispatcher::dispatch`] because these two
/// tools need the `McpRegistry` the turn loop already owns, rather than
/// state this crate holds.
///
/// # Errors
///
/// Returns [`CatalogError::ToolNotFound`] for any other tool name, or
/// propagates the underlying [`conductor_mcp::McpError`].
pub async fn dispatch_mcp_bridge(
    registry: &conductor_mcp::McpRegistry,
    session: &SessionId,
    name: &str,
    args: &Value,
) -> CatalogResult<String> {
    match name {
        names::GET_PROMPT => {
            let server = require_str(args, "server")?;
            let prompt_name = require_str(args, "name")?;
            let arguments = args.get("arguments").and_then(Value::as_object).cloned();
            let content = registry.get_prompt(session, server, prompt_name, arguments).await?;
            serde_json::to_string(&content).map_err(|e| CatalogError::Serialization(e.to_string()))
        },
        names::GET_RESOURCE => {
            let server = require_str(args, "server")?;
            let uri = require_str(args, "uri")?;
            let content = registry.read_resource(session, server, uri).await?;
            serde_json::to_string(&content).map_err(|e| CatalogError::Serialization(e.to_string()))
        },
        other => Err(CatalogError::ToolNotFound(other.to_string())),
    }
}

/// Confirmation text plus payload produced by the `read_image` virtual tool,
/// serialized as the tool-response content and decoded by the caller to
/// build the synthesized image message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoadedImage {
    /// Text shown to the model confirming the load.
    pub confirmation: String,
    /// The actual image payload, either a remote URL or inline base64 data.
    #[serde(flatten)]
    pub payload: ImagePayload,
}

/// How a loaded image's bytes are made available to the next model turn.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImagePayload {
    /// Pass the URL straight through; the provider fetches it.
    Url {
        /// The source URL.
        url: String,
    },
    /// Base64-encoded bytes read from a local path.
    Inline {
        /// MIME type inferred from the file extension.
        mime: String,
        /// Base64-encoded image bytes.
        data: String,
    },
}

async fn load_image(path_or_url: &str) -> CatalogResult<LoadedImage> {
    let confirmation = "Image loaded and processed; it will be attached to the next message.".to_string();
    if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
        return Ok(LoadedImage {
            confirmation,
            payload: ImagePayload::Url {
                url: path_or_url.to_string(),
            },
        });
    }

    let bytes = tokio::fs::read(path_or_url).await.map_err(CatalogError::from)?;
    Ok(LoadedImage {
        confirmation,
        payload: ImagePayload::Inline {
            mime: mime_from_extension(path_or_url),
            data: BASE64.encode(bytes),
        },
    })
}

fn mime_from_extension(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn require_str<'a>(args: &'a Value, field: &str) -> CatalogResult<&'a str> {
    args.get(field).and_then(Value::as_str).ok_or_else(|| CatalogError::InvalidArguments {
        tool: field.to_string(),
        reason: format!("missing required string field `{field}`"),
    })
}

/// A deliberately minimal jq-style accessor: dotted field paths and `[n]`
/// array indices only (`a.b[0].c`). Anything beyond that is out of scope —
/// the generated-code execution pipeline, not this core, is where a real
/// jq engine would live.
fn jq_lite(value: &Value, query: &str) -> String {
    let mut current = value.clone();
    for segment in query.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (field, index) = match segment.find('[') {
            Some(pos) => (&segment[..pos], segment[pos + 1..].trim_end_matches(']').parse::<usize>().ok()),
            None => (segment, None),
        };
        if !field.is_empty() {
            current = match current.get(field) {
                Some(v) => v.clone(),
                None => return "null".to_string(),
            };
        }
        if let Some(i) = index {
            current = match current.get(i) {
                Some(v) => v.clone(),
                None => return "null".to_string(),
            };
        }
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;
    use serde_json::json;

    fn dispatcher_with_search() -> VirtualToolDispatcher {
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let descriptors = vec![ToolDescriptor::mcp("read_file", "fs", "read a file", Value::Null)];
        let mode = ToolSearchMode::new(descriptors, &[]);
        VirtualToolDispatcher::new(store).with_search_mode(mode)
    }

    #[tokio::test]
    async fn search_tools_returns_hits_without_activating() {
        let dispatcher = dispatcher_with_search();
        let catalog = ToolCatalog::new();
        let result = dispatcher
            .dispatch(&SessionId::global(), SEARCH_TOOLS, &json!({"query": "file"}), &catalog)
            .await
            .unwrap();
        assert!(result.contains("read_file"));
        assert!(dispatcher.active_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_tool_activates_and_rebuild_reflects_it() {
        let dispatcher = dispatcher_with_search();
        let catalog = ToolCatalog::new();
        dispatcher
            .dispatch(&SessionId::global(), ADD_TOOL, &json!({"tool_names": ["read_file"]}), &catalog)
            .await
            .unwrap();
        let active = dispatcher.active_tools().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "read_file");
    }

    #[tokio::test]
    async fn dispatch_without_search_mode_errors_as_not_found() {
        let store = Arc::new(ToolOutputStore::new(PathBuf::from("/tmp")));
        let dispatcher = VirtualToolDispatcher::new(store);
        let catalog = ToolCatalog::new();
        let result = dispatcher.dispatch(&SessionId::global(), SEARCH_TOOLS, &json!({}), &catalog).await;
        assert!(result.is_err());
    }

    #[test]
    fn jq_lite_dotted_path_and_index() {
        let value = json!({"a": {"b": [10, 20, 30]}});
        assert_eq!(jq_lite(&value, "a.b[1]"), "20");
        assert_eq!(jq_lite(&value, "a.missing"), "null");
    }
}
