//! Convenience re-exports.
//!
//! ```rust
//! use conductor_config::prelude::*;
//! ```

pub use crate::{default_path, load_layered};
pub use crate::{ConfigError, ConfigResult};
pub use crate::{RuntimeOverrides, ServerOverride};
pub use crate::validate;
