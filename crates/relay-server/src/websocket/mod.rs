//! WebSocket transport: the socket abstraction sessions write through and
//! the per-connection read/write loop.

pub mod connection;
pub mod socket;
