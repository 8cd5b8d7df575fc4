#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! The tool catalog and routing layer for the conductor agent runtime.
//!
//! Holds MCP-discovered, built-in virtual, and host-registered custom tools
//! behind one [`catalog::ToolCatalog`]; applies server/tool allowlists via
//! [`filter::ToolFilter`]; optionally hides the catalog behind
//! [`search::ToolSearchMode`]'s search/add indirection; offloads oversized
//! tool responses via [`output_store::ToolOutputStore`]; and flags a model
//! stuck repeating itself via [`loop_detector::LoopDetector`].
//!
//! Tool kinds are a tagged variant rather than an abstract "tool object"
//! with behavior, because their failure modes differ: only MCP calls get
//! broken-pipe recovery (that lives in `conductor-mcp`), customs and
//! virtuals never do.

mod catalog;
mod descriptor;
mod error;
mod filter;
mod loop_detector;
mod output_store;
mod search;
mod truncate;
mod virtual_tools;

pub mod prelude;

pub use catalog::ToolCatalog;
pub use descriptor::{CustomTool, CustomToolExecutor, ToolDescriptor, ToolKind, TimeoutPolicy};
pub use error::{CatalogError, CatalogResult};
pub use filter::ToolFilter;
pub use loop_detector::{Detection, LoopDetector, DEFAULT_THRESHOLD as LOOP_DETECTOR_DEFAULT_THRESHOLD};
pub use output_store::{
    estimate_tokens, extract_content, ToolOutputStore, DEFAULT_HARD_CAP, DEFAULT_OFFLOAD_THRESHOLD,
    DEFAULT_RETENTION,
};
pub use search::{SearchHit, ToolSearchMode, ADD_TOOL, SEARCH_TOOLS, SHOW_ALL_TOOLS};
pub use truncate::truncate_at_char_boundary;
pub use virtual_tools::{
    always_on_descriptors, code_execution_descriptors, dispatch_mcp_bridge, mcp_bridge_descriptors,
    names as virtual_tool_names, CodeExecutionBackend, ImagePayload, LoadedImage, VirtualToolDispatcher,
};
