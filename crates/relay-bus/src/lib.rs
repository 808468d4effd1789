//! # relay-bus
//!
//! Typed, synchronous, in-process publish/subscribe.
//!
//! - [`EventBus`]: exact-type, category and wildcard-pattern subscriptions
//!   with per-key handler caps
//! - [`TypedEvent`] / [`EventCategory`]: the event envelope
//! - [`Pattern`]: dot-segment matching with `*` and `**`
//! - [`KnownEvent`]: compile-time checked payloads for registered types
//!
//! Handlers run inline in `emit`. Async work is returned as a
//! [`HandlerOutput::Task`] and spawned, never awaited.

#![deny(unsafe_code)]

pub mod bus;
pub mod event;
pub mod handler;
pub mod known;
pub mod pattern;

pub use bus::{
    DEFAULT_MAX_HANDLERS_PER_KEY, DEFAULT_WAIT_TIMEOUT, EventBus, SubscriptionKeys, Unsubscribe,
};
pub use event::{EventCategory, TypedEvent, namespace_of};
pub use handler::{HandlerFuture, HandlerOutput};
pub use known::{KnownEvent, SessionConnected, SessionDisconnected, SystemShutdown};
pub use pattern::Pattern;
