//! Core identifiers and primitive types shared by every conductor crate.
//!
//! This crate is deliberately small: it holds the handful of newtypes that
//! would otherwise be duplicated (and drift) across `conductor-mcp`,
//! `conductor-events`, `conductor-tools` and `conductor-runtime`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod ids;
mod time;

pub mod prelude;

pub use ids::{AgentId, SessionId, SpanId, ToolCallId};
pub use time::Timestamp;
