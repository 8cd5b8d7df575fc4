#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Base + workspace-override loading, protected-field sanitization, and
//! per-agent runtime overrides for MCP server configuration.
//!
//! `conductor-mcp::ServersConfig` owns the wire shape of a single config
//! file; this crate owns layering two of them together (a base system or
//! user file, optionally overridden by a workspace file) and applying
//! per-agent argument/environment overrides at call time, without ever
//! letting a workspace override widen a server's trusted command, args,
//! env, cwd, binary hash, or trust flag.

mod error;
mod loader;
mod merge;
mod overrides;
mod validate;

pub mod prelude;

pub use error::{ConfigError, ConfigResult};
pub use loader::{default_path, load_layered};
pub use merge::{deep_merge, sanitize_workspace_servers, PROTECTED_SERVER_FIELDS};
pub use overrides::{RuntimeOverrides, ServerOverride};
pub use validate::validate;
