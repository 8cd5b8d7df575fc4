//! Unified prelude for the conductor agent runtime.
//!
//! This crate provides a single import to bring in the commonly used types
//! from across the workspace. Use this when you need types from multiple
//! crates without managing individual imports.
//!
//! # Usage
//!
//! ```rust,ignore
//! use conductor_prelude::*;
//!
//! // Now you have access to types from:
//! // - conductor-core (identifiers, errors)
//! // - conductor-events (the event bus)
//! // - conductor-llm (providers, messages)
//! // - conductor-mcp (client, servers config)
//! // - conductor-tools (catalog, descriptors, virtual tools)
//! // - conductor-runtime (Agent, context manager, turn loop)
//! // - conductor-config (layered MCP server configuration)
//! ```
//!
//! # Per-crate preludes
//!
//! If you only need types from one crate, use its own prelude:
//!
//! ```rust,ignore
//! use conductor_runtime::prelude::*;
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conductor_prelude::*;
//!
//! # async fn example() -> RuntimeResult<()> {
//! let llm = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("hi")]));
//! let agent = Agent::new(llm, None, AgentOptions::default()).await?;
//! let session = SessionId::new("demo");
//! let answer = agent.ask(&session, "hello", || false).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub use conductor_config::prelude::*;
pub use conductor_core::prelude::*;
pub use conductor_events::prelude::*;
pub use conductor_llm::prelude::*;
pub use conductor_mcp::prelude::*;
pub use conductor_runtime::prelude::*;
pub use conductor_tools::prelude::*;
