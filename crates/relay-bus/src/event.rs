//! Event envelope and category derivation.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse grouping of event types, usable as a subscription key.
///
/// The first seven variants are derived from an event type's first segment.
/// `External` and `Client` are only assigned to events published by
/// WebSocket clients through the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Agent lifecycle.
    Agent,
    /// Tool execution.
    Tool,
    /// Resource changes.
    Resource,
    /// Plugin lifecycle.
    Plugin,
    /// System-wide notices; also the fallback for unknown namespaces.
    System,
    /// Messaging channel adapters.
    Channel,
    /// The gateway itself (sessions, connections).
    Gateway,
    /// Client-published events under `external.`.
    External,
    /// Client-published events under `client.`.
    Client,
}

impl EventCategory {
    /// Categories that [`EventCategory::from_event_type`] can produce.
    pub const DERIVABLE: [Self; 7] = [
        Self::Agent,
        Self::Tool,
        Self::Resource,
        Self::Plugin,
        Self::System,
        Self::Channel,
        Self::Gateway,
    ];

    /// Wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Plugin => "plugin",
            Self::System => "system",
            Self::Channel => "channel",
            Self::Gateway => "gateway",
            Self::External => "external",
            Self::Client => "client",
        }
    }

    /// Parse a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::DERIVABLE
            .into_iter()
            .chain([Self::External, Self::Client])
            .find(|c| c.as_str() == name)
    }

    /// Category of an event type: its first segment when that is one of
    /// [`EventCategory::DERIVABLE`], otherwise [`EventCategory::System`].
    pub fn from_event_type(event_type: &str) -> Self {
        let namespace = namespace_of(event_type);
        Self::DERIVABLE
            .into_iter()
            .find(|c| c.as_str() == namespace)
            .unwrap_or(Self::System)
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First dot-segment of an event type.
pub fn namespace_of(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or_default()
}

/// An emitted occurrence. Exists only for the duration of one dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedEvent {
    /// Dot-delimited event type, e.g. `agent.complete`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Category, normally derived from `event_type`.
    pub category: EventCategory,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Emitting component, e.g. `orchestrator` or `ws:<session id>`.
    pub source: String,
    /// Opaque payload.
    pub data: Value,
}

impl TypedEvent {
    /// Build an event stamped now, deriving the category from the type.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        let event_type = event_type.into();
        let category = EventCategory::from_event_type(&event_type);
        Self::with_category(event_type, category, source, data)
    }

    /// Build an event stamped now with an explicit category.
    pub fn with_category(
        event_type: impl Into<String>,
        category: EventCategory,
        source: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source: source.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_known_categories() {
        assert_eq!(EventCategory::from_event_type("agent.complete"), EventCategory::Agent);
        assert_eq!(EventCategory::from_event_type("tool.run.start"), EventCategory::Tool);
        assert_eq!(EventCategory::from_event_type("gateway"), EventCategory::Gateway);
        assert_eq!(EventCategory::from_event_type("channel.msg"), EventCategory::Channel);
    }

    #[test]
    fn unknown_namespace_falls_back_to_system() {
        assert_eq!(EventCategory::from_event_type("workflow.done"), EventCategory::System);
        assert_eq!(EventCategory::from_event_type(""), EventCategory::System);
        // Client namespaces are never derived, only assigned.
        assert_eq!(EventCategory::from_event_type("external.ping"), EventCategory::System);
    }

    #[test]
    fn derivation_is_case_sensitive() {
        assert_eq!(EventCategory::from_event_type("Agent.complete"), EventCategory::System);
    }

    #[test]
    fn parse_round_trips_every_name() {
        for c in EventCategory::DERIVABLE
            .into_iter()
            .chain([EventCategory::External, EventCategory::Client])
        {
            assert_eq!(EventCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(EventCategory::parse("nope"), None);
    }

    #[test]
    fn new_event_serializes_with_wire_names() {
        let event = TypedEvent::new("agent.complete", "orchestrator", json!({"agentId": "a1"}));
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "agent.complete");
        assert_eq!(v["category"], "agent");
        assert_eq!(v["source"], "orchestrator");
        assert_eq!(v["data"]["agentId"], "a1");
        assert!(chrono::DateTime::parse_from_rfc3339(v["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn explicit_category_is_kept() {
        let event =
            TypedEvent::with_category("client.ping", EventCategory::Client, "ws:s1", json!(null));
        assert_eq!(event.category, EventCategory::Client);
    }

    #[test]
    fn namespace_is_first_segment() {
        assert_eq!(namespace_of("system.shutdown"), "system");
        assert_eq!(namespace_of("solo"), "solo");
        assert_eq!(namespace_of(""), "");
    }
}
