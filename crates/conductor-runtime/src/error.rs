//! Top-level runtime error, wrapping every per-component error.

use thiserror::Error;

use conductor_llm::LlmError;
use conductor_mcp::McpError;
use conductor_tools::CatalogError;

use crate::context::ContextError;

/// Errors surfaced by the turn loop, the context window manager, and the
/// agent facade.
///
/// Per-component errors (`CatalogError`, `McpError`, `ContextError`,
/// `LlmError`) convert in via `#[from]`; everything recoverable at the tool
/// level is instead folded into a tool-response message and never reaches
/// this type — only unrecoverable conductor-level failures surface to the
/// caller.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Tool catalog, dispatch, or offload failure that escaped tool-level
    /// recovery (this should be rare — most `CatalogError`s are caught by
    /// the executor and turned into tool-response messages instead).
    #[error("tool catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// MCP-layer failure that escaped broken-pipe recovery.
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Context window management failure (pre-flight overflow, summarization
    /// call failure).
    #[error("context window error: {0}")]
    Context(#[from] ContextError),

    /// The underlying LLM call failed with non-empty-content semantics
    /// (empty-content errors are retried via the fallback chain before
    /// reaching here).
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    /// `max_turns` was reached and the forced final-answer call itself failed.
    #[error("exhausted max_turns and the final-answer call failed: {0}")]
    FinalAnswerFailed(String),

    /// Any stage observed caller cancellation.
    #[error("operation cancelled at stage: {stage}")]
    Cancelled {
        /// Where cancellation was observed, e.g. `"turn_start"`, `"tool_dispatch"`.
        stage: String,
    },

    /// No system prompt was configured and none could be synthesized.
    #[error("no system prompt available")]
    MissingSystemPrompt,

    /// Structured-output extraction failed (post-hoc parse and tool-gated
    /// paths both exhausted).
    #[error("could not extract structured output: {0}")]
    StructuredOutputFailed(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
