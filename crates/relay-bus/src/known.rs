//! Statically registered event types.
//!
//! A [`KnownEvent`] pairs a type literal with its payload struct so that
//! [`crate::EventBus::emit_typed`] can check the payload shape at compile
//! time. Everything else goes through the dynamic `serde_json::Value` path.

use serde::{Deserialize, Serialize};

/// A payload type registered under a fixed event type.
pub trait KnownEvent: Serialize {
    /// The event type this payload is emitted under.
    const TYPE: &'static str;
}

/// A client session was registered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConnected {
    /// New session.
    pub session_id: String,
    /// Authenticated user, if the client supplied one.
    pub user_id: Option<String>,
}

impl KnownEvent for SessionConnected {
    const TYPE: &'static str = "gateway.session.connected";
}

/// A client session was removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDisconnected {
    /// Removed session.
    pub session_id: String,
    /// Why it went away (`closed`, `idle timeout`, `shutdown`, ...).
    pub reason: String,
}

impl KnownEvent for SessionDisconnected {
    const TYPE: &'static str = "gateway.session.disconnected";
}

/// The gateway is shutting down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemShutdown {
    /// Shutdown trigger.
    pub reason: String,
}

impl KnownEvent for SystemShutdown {
    const TYPE: &'static str = "system.shutdown";
}
