//! Agent runtime: per-session turn orchestration, context window
//! management, and parallel tool dispatch for the conductor agent.
//!
//! [`agent::Agent`] is the facade most callers want: it wraps
//! [`turn_loop::TurnLoop`] with a per-session registry, building a fresh
//! [`executor::ParallelToolExecutor`] and active-tool list on every call
//! while carrying [`context::ContextManager`] state forward between calls.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod agent;
mod context;
mod error;
mod executor;
mod turn_loop;

pub mod prelude;

pub use agent::{Agent, AgentOptions, SessionStats};
pub use context::{
    CompactionConfig, ContextError, ContextManager, ContextResult, SummarizationConfig, TokenLedger,
    PREFLIGHT_FALLBACK_CAP, PREFLIGHT_WINDOW_FRACTION,
};
pub use error::{RuntimeError, RuntimeResult};
pub use executor::{image_first_for_provider, BatchResult, ParallelToolExecutor, DEFAULT_TOOL_TIMEOUT};
pub use turn_loop::{TurnLoop, TurnLoopConfig, DEFAULT_MAX_TOKENS, DEFAULT_MAX_TURNS};
