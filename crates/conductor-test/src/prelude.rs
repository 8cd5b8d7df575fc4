//! Convenience re-exports.
//!
//! ```rust
//! use conductor_test::prelude::*;
//! ```

pub use crate::fixtures::*;
