//! Language-model provider abstraction for the conductor agent runtime.
//!
//! This crate defines the [`LlmProvider`] trait (`generate(messages,
//! options) -> {choices, usage}`) that every model backend implements. It
//! ships no concrete HTTP-backed provider -- only the trait plus
//! [`ScriptedProvider`], a deterministic in-memory fake for tests.
//!
//! # Example
//!
//! ```rust
//! use conductor_llm::prelude::*;
//!
//! # async fn example() -> LlmResult<()> {
//! let provider = ScriptedProvider::new(vec![ScriptedTurn::text("hi there")]);
//! let response = provider
//!     .generate(&[Message::human("hello")], &GenerateOptions::new())
//!     .await?;
//! assert_eq!(response.first_choice().unwrap().content.as_deref(), Some("hi there"));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod provider;
mod scripted;
mod types;

pub mod prelude;

pub use error::{LlmError, LlmResult};
pub use provider::LlmProvider;
pub use scripted::{ScriptedProvider, ScriptedToolCall, ScriptedTurn};
pub use types::{
    Choice, ContentPart, GenerateOptions, GenerateResponse, LlmToolDefinition, Message,
    MessageRole, ModelMetadata, ToolCall, ToolCallResult, ToolChoice, Usage,
};
