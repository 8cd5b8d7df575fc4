//! Shared test utilities for the conductor agent runtime workspace.
//!
//! This crate provides identifier fixtures and `ScriptedProvider` builders
//! used across multiple crates' test suites, as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! conductor-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn asks_a_question() {
//!     let llm = std::sync::Arc::new(conductor_test::text_provider("hi"));
//!     let agent = conductor_runtime::Agent::new(llm, None, Default::default()).await.unwrap();
//!     let session = conductor_test::test_session_id();
//!     let answer = agent.ask(&session, "hello", || false).await.unwrap();
//!     assert_eq!(answer, "hi");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod prelude;

pub use fixtures::*;
