//! Correlated event tree for the conductor agent runtime.
//!
//! This crate provides:
//! - Event types covering every milestone named in the core's design (turn
//!   boundaries, LLM calls, tool dispatch, recovery, completion).
//! - A broadcast-based [`EventBus`] for async subscribers.
//! - A [`SubscriberRegistry`] for synchronous handlers.
//! - An [`EventEmitter`] that stamps span/parent/hierarchy-level fields
//!   before fan-out: start events push a level; `conversation_turn` resets
//!   to level 2; `tool_call_start` is a sibling of the preceding
//!   `llm_generation_end`; end events never change the level.
//!
//! # Example
//!
//! ```rust
//! use conductor_core::SessionId;
//! use conductor_events::{ConductorEvent, EventBus, EventEmitter};
//!
//! # async fn example() {
//! let emitter = EventEmitter::new(SessionId::global(), EventBus::new());
//! let mut receiver = emitter.bus().subscribe();
//!
//! emitter.emit(ConductorEvent::ConversationStart {
//!     metadata: emitter.metadata("turn_loop"),
//!     last_user_message: Some("hello".to_string()),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "conversation_start");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

mod bus;
mod emitter;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use emitter::EventEmitter;
pub use event::{ConductorEvent, EventMetadata};
pub use subscriber::{
    EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
