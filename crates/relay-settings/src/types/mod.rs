//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields; the rest keep their compiled
//! defaults.

mod limits;
mod server;

pub use limits::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the Relay gateway.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "limits": { "rateLimitBurst": 100 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Network and connection-loop settings.
    pub server: ServerSettings,
    /// Per-session resource caps and rate limiting.
    pub limits: SessionLimits,
    /// Event bus settings.
    pub bus: BusSettings,
    /// Client-facing bridge validation settings.
    pub bridge: BridgeSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}
