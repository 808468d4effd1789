//! # relay-core
//!
//! Foundation types shared by every Relay crate:
//!
//! - **Branded IDs**: [`SessionId`] and [`ConnectionId`] newtypes
//! - **Errors**: the [`RelayError`] taxonomy (validation, capacity,
//!   transport, timeout) built on `thiserror`
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer
//!   for log assertions in tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{
    CapacityError, CapacityKind, RelayError, Result, TimeoutError, TransportError,
    ValidationError,
};
pub use ids::{ConnectionId, SessionId};
