//! Convenience re-exports.
//!
//! ```rust
//! use conductor_llm::prelude::*;
//! ```

// Errors
pub use crate::{LlmError, LlmResult};

// Provider trait
pub use crate::LlmProvider;

// Test fake
pub use crate::{ScriptedProvider, ScriptedToolCall, ScriptedTurn};

// Message types
pub use crate::{ContentPart, Message, MessageRole};

// Generation types
pub use crate::{Choice, GenerateOptions, GenerateResponse, ModelMetadata, ToolChoice, Usage};

// Tool types
pub use crate::{LlmToolDefinition, ToolCall, ToolCallResult};
