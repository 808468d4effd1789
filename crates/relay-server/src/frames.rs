//! Wire frames exchanged with WebSocket clients.
//!
//! Outbound: `{type, payload, timestamp}`, built once per send or broadcast.
//! Inbound: `{type, payload}`, decoded into [`InboundFrame`].

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound frame type names.
pub mod types {
    /// Sent once after the session is registered.
    pub const CONNECTION_ESTABLISHED: &str = "connection:established";
    /// Reply to `channel:join`.
    pub const CHANNEL_JOINED: &str = "channel:joined";
    /// Reply to `channel:leave`.
    pub const CHANNEL_LEFT: &str = "channel:left";
    /// Reply to an unparseable or rejected inbound frame.
    pub const ERROR: &str = "error";
    /// Reply to `subscribe`.
    pub const EVENT_SUBSCRIBED: &str = "event:subscribed";
    /// Reply to `unsubscribe`.
    pub const EVENT_UNSUBSCRIBED: &str = "event:unsubscribed";
    /// A bus event forwarded to a subscriber.
    pub const EVENT_MESSAGE: &str = "event:message";
    /// Successful `publish`.
    pub const EVENT_PUBLISH_ACK: &str = "event:publish:ack";
    /// Rejected `publish`.
    pub const EVENT_PUBLISH_ERROR: &str = "event:publish:error";
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize + ?Sized> {
    #[serde(rename = "type")]
    frame_type: &'a str,
    payload: &'a T,
    timestamp: String,
}

/// Serialize an outbound envelope stamped now.
pub fn encode<T: Serialize + ?Sized>(
    frame_type: &str,
    payload: &T,
) -> serde_json::Result<Arc<String>> {
    let envelope = Envelope {
        frame_type,
        payload,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    serde_json::to_string(&envelope).map(Arc::new)
}

/// Control frame sent by a client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum InboundFrame {
    /// Forward bus events matching `pattern`.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Wildcard pattern.
        pattern: String,
    },
    /// Stop forwarding `pattern`.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Pattern previously subscribed.
        pattern: String,
    },
    /// Emit an event onto the bus.
    #[serde(rename = "publish")]
    Publish {
        /// Event type; must be in a client namespace.
        #[serde(rename = "type")]
        event_type: String,
        /// Event payload.
        #[serde(default)]
        data: Value,
    },
    /// Join a named channel.
    #[serde(rename = "channel:join")]
    ChannelJoin {
        /// Channel name.
        channel: String,
    },
    /// Leave a named channel.
    #[serde(rename = "channel:leave")]
    ChannelLeave {
        /// Channel name.
        channel: String,
    },
    /// Store a metadata entry on the session.
    #[serde(rename = "metadata:set")]
    MetadataSet {
        /// Metadata key.
        key: String,
        /// Any JSON value.
        #[serde(default)]
        value: Value,
    },
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Wire name of the frame type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Publish { .. } => "publish",
            Self::ChannelJoin { .. } => "channel:join",
            Self::ChannelLeave { .. } => "channel:leave",
            Self::MetadataSet { .. } => "metadata:set",
        }
    }
}

/// Payload of `connection:established`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEstablished<'a> {
    /// The new session's ID.
    pub session_id: &'a str,
}

/// Payload of `channel:joined`.
#[derive(Clone, Debug, Serialize)]
pub struct ChannelJoined<'a> {
    /// Channel name.
    pub channel: &'a str,
    /// Whether the join was accepted.
    pub success: bool,
}

/// Payload of `channel:left`.
#[derive(Clone, Debug, Serialize)]
pub struct ChannelLeft<'a> {
    /// Channel name.
    pub channel: &'a str,
}

/// Payload of `error`.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorFrame<'a> {
    /// Human-readable description.
    pub message: &'a str,
}

/// Payload of `event:subscribed`.
#[derive(Clone, Debug, Serialize)]
pub struct SubscribedAck<'a> {
    /// Requested pattern.
    pub pattern: &'a str,
    /// Whether the subscription is active.
    pub success: bool,
    /// Rejection reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `event:unsubscribed`.
#[derive(Clone, Debug, Serialize)]
pub struct UnsubscribedAck<'a> {
    /// Requested pattern.
    pub pattern: &'a str,
}

/// Payload of `event:message`.
#[derive(Clone, Debug, Serialize)]
pub struct ForwardedEvent<'a> {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: &'a str,
    /// Emitting component.
    pub source: &'a str,
    /// Event payload.
    pub data: &'a Value,
    /// Event creation time.
    pub timestamp: &'a str,
}

/// Payload of `event:publish:ack` and `event:publish:error`.
#[derive(Clone, Debug, Serialize)]
pub struct PublishResult<'a> {
    /// Requested event type.
    #[serde(rename = "type")]
    pub event_type: &'a str,
    /// Rejection reason; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
