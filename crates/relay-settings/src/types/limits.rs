//! Resource caps for sessions, the event bus, and the client bridge.

use serde::{Deserialize, Serialize};

/// Per-session caps and rate limiting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionLimits {
    /// Token bucket capacity.
    pub rate_limit_burst: f64,
    /// Token bucket refill rate, tokens per second.
    pub rate_limit_per_sec: f64,
    /// Distinct channels one session may join.
    pub max_channels: usize,
    /// Distinct metadata keys one session may hold.
    pub max_metadata_keys: usize,
    /// Maximum metadata key length, in characters.
    pub max_metadata_key_len: usize,
    /// Maximum serialized metadata value size, in bytes.
    pub max_metadata_value_bytes: usize,
    /// Concurrent bus subscriptions one session may hold.
    pub max_event_subscriptions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            rate_limit_burst: 50.0,
            rate_limit_per_sec: 30.0,
            max_channels: 50,
            max_metadata_keys: 50,
            max_metadata_key_len: 100,
            max_metadata_value_bytes: 1024,
            max_event_subscriptions: 50,
        }
    }
}

/// Event bus settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Handlers allowed under a single type, category, or pattern key.
    pub max_handlers_per_key: usize,
    /// Default `wait_for` deadline, in milliseconds.
    pub wait_for_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            max_handlers_per_key: 100,
            wait_for_timeout_ms: 30_000,
        }
    }
}

/// Validation bounds for client subscribe/publish requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Maximum pattern length, in characters.
    pub max_pattern_length: usize,
    /// Maximum number of dot-segments in a pattern.
    pub max_pattern_depth: usize,
    /// Maximum number of `**` segments in a pattern.
    pub max_globstars: usize,
    /// Maximum published event type length, in characters.
    pub max_event_type_length: usize,
    /// First segments clients may publish under.
    pub allowed_publish_namespaces: Vec<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_pattern_length: 100,
            max_pattern_depth: 6,
            max_globstars: 2,
            max_event_type_length: 100,
            allowed_publish_namespaces: vec!["external".to_string(), "client".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_limit_defaults() {
        let l = SessionLimits::default();
        assert!((l.rate_limit_burst - 50.0).abs() < f64::EPSILON);
        assert!((l.rate_limit_per_sec - 30.0).abs() < f64::EPSILON);
        assert_eq!(l.max_channels, 50);
        assert_eq!(l.max_metadata_keys, 50);
        assert_eq!(l.max_metadata_key_len, 100);
        assert_eq!(l.max_metadata_value_bytes, 1024);
        assert_eq!(l.max_event_subscriptions, 50);
    }

    #[test]
    fn bridge_defaults_allow_only_client_namespaces() {
        let b = BridgeSettings::default();
        assert_eq!(b.allowed_publish_namespaces, ["external", "client"]);
        assert_eq!(b.max_pattern_depth, 6);
    }

    #[test]
    fn bus_defaults() {
        let b = BusSettings::default();
        assert_eq!(b.max_handlers_per_key, 100);
        assert_eq!(b.wait_for_timeout_ms, 30_000);
    }
}
