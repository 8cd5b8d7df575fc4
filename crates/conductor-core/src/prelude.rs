//! Convenience re-exports for downstream crates.

pub use crate::{AgentId, SessionId, SpanId, Timestamp, ToolCallId};
