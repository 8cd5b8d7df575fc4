//! Convenience re-exports.
//!
//! ```rust
//! use conductor_runtime::prelude::*;
//! ```

// Agent facade
pub use crate::{Agent, AgentOptions, SessionStats};

// Context window management
pub use crate::{CompactionConfig, ContextError, ContextManager, ContextResult, SummarizationConfig, TokenLedger};

// Errors
pub use crate::{RuntimeError, RuntimeResult};

// Parallel tool execution
pub use crate::{BatchResult, ParallelToolExecutor};

// Turn loop
pub use crate::{TurnLoop, TurnLoopConfig};
