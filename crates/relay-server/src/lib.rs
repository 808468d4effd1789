//! # relay-server
//!
//! Axum HTTP + `WebSocket` gateway over the Relay event bus.
//!
//! - [`session::SessionManager`]: live client sessions, channels, metadata,
//!   and bounded per-session outbound queues
//! - [`bridge::EventBusBridge`]: validated client subscribe/publish access to
//!   the in-process [`relay_bus::EventBus`]
//! - [`server::GatewayServer`]: `/ws`, `/health`, and `/metrics` routes
//! - Graceful shutdown via `CancellationToken`, idle-session sweeping

#![deny(unsafe_code)]

pub mod bridge;
pub mod frames;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod sweeper;
pub mod websocket;

pub use bridge::EventBusBridge;
pub use server::{AppState, GatewayServer};
pub use session::{SessionInfo, SessionManager};
