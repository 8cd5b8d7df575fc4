//! Convenience re-exports.
//!
//! ```rust
//! use conductor_events::prelude::*;
//! ```

pub use crate::{
    ConductorEvent, DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, EventFilter, EventReceiver,
    EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
