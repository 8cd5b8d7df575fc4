//! Convenience re-exports.
//!
//! ```rust
//! use conductor_tools::prelude::*;
//! ```

pub use crate::{
    always_on_descriptors, code_execution_descriptors, dispatch_mcp_bridge, estimate_tokens, extract_content,
    mcp_bridge_descriptors, truncate_at_char_boundary, virtual_tool_names, CatalogError, CatalogResult,
    CodeExecutionBackend, CustomTool, CustomToolExecutor, Detection, ImagePayload, LoadedImage, LoopDetector,
    SearchHit, TimeoutPolicy, ToolCatalog, ToolDescriptor, ToolFilter, ToolKind, ToolOutputStore, ToolSearchMode,
    VirtualToolDispatcher, ADD_TOOL, SEARCH_TOOLS, SHOW_ALL_TOOLS,
};
