//! Error taxonomy for the Relay gateway.
//!
//! - [`ValidationError`]: malformed client input (bad pattern, disallowed
//!   publish namespace). Reported only to the offending session.
//! - [`CapacityError`]: a per-key or per-session cap was reached. Logged as a
//!   potential leak; the call becomes a no-op.
//! - [`TransportError`]: a socket write or close failed. Triggers eviction of
//!   the session; never reported to the peer.
//! - [`TimeoutError`]: a `wait_for` deadline passed. Surfaced only to the
//!   awaiting caller.
//!
//! [`RelayError`] unifies them. Its `Display` output is what clients see in
//! negative acknowledgements, so variant messages are written for humans.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::ids::SessionId;

/// Malformed client input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Subscription pattern was empty.
    #[error("Pattern must not be empty")]
    EmptyPattern,
    /// Subscription pattern is longer than allowed.
    #[error("Pattern exceeds maximum length of {max} characters")]
    PatternTooLong {
        /// Maximum accepted length.
        max: usize,
    },
    /// Subscription pattern contains characters outside the allowed set.
    #[error("Pattern contains invalid characters (allowed: letters, digits, '_', '-', '.', '*')")]
    InvalidPatternCharacters,
    /// Subscription pattern has too many dot-segments.
    #[error("Pattern exceeds maximum depth of {max} segments")]
    PatternTooDeep {
        /// Maximum accepted segment count.
        max: usize,
    },
    /// Subscription pattern uses too many `**` segments.
    #[error("Pattern contains more than {max} '**' wildcards")]
    TooManyGlobstars {
        /// Maximum accepted `**` count.
        max: usize,
    },
    /// Published event type was empty.
    #[error("Event type must not be empty")]
    EmptyEventType,
    /// Published event type is longer than allowed.
    #[error("Event type exceeds maximum length of {max} characters")]
    EventTypeTooLong {
        /// Maximum accepted length.
        max: usize,
    },
    /// Published event type is outside the namespaces clients may use.
    #[error("Event namespace '{namespace}' is not allowed for client publishes")]
    NamespaceNotAllowed {
        /// The rejected first segment.
        namespace: String,
    },
}

/// Which bounded resource a [`CapacityError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapacityKind {
    /// Handlers registered under one bus key.
    Handlers,
    /// Channels joined by one session.
    Channels,
    /// Metadata keys stored on one session.
    MetadataKeys,
    /// Bus subscriptions held by one session.
    EventSubscriptions,
}

impl fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Handlers => "handlers per key",
            Self::Channels => "channels per session",
            Self::MetadataKeys => "metadata keys per session",
            Self::EventSubscriptions => "event subscriptions per session",
        };
        f.write_str(s)
    }
}

/// A bounded resource is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Maximum of {limit} {kind} reached")]
pub struct CapacityError {
    /// The resource that is full.
    pub kind: CapacityKind,
    /// The configured cap.
    pub limit: usize,
}

impl CapacityError {
    /// Build a capacity error for `kind` at `limit`.
    pub fn new(kind: CapacityKind, limit: usize) -> Self {
        Self { kind, limit }
    }
}

/// Socket-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone; the outbound side is closed.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is full; the frame was not written.
    #[error("outbound queue full")]
    QueueFull,
    /// The frame could not be serialized.
    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the peer should be considered dead.
    ///
    /// A full queue is backpressure from a slow reader, not a dead socket.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// `wait_for` deadline exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {timeout:?} waiting for '{event_type}'")]
pub struct TimeoutError {
    /// Event type that was awaited.
    pub event_type: String,
    /// How long the caller waited.
    pub timeout: Duration,
}

/// Top-level error type for the Relay gateway.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed client input.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A bounded resource is full.
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    /// Socket failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Awaited event did not arrive in time.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// No session is registered under the given ID.
    #[error("Session not found: {0}")]
    UnknownSession(SessionId),
    /// The event bridge has been stopped.
    #[error("Event bridge is not running")]
    BridgeStopped,
}

impl RelayError {
    /// Short machine-readable code, used as a log field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Capacity(_) => "CAPACITY",
            Self::Transport(_) => "TRANSPORT",
            Self::Timeout(_) => "TIMEOUT",
            Self::UnknownSession(_) => "UNKNOWN_SESSION",
            Self::BridgeStopped => "BRIDGE_STOPPED",
        }
    }
}

/// Result type for Relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn validation_messages_are_distinct() {
        let errors = [
            ValidationError::EmptyPattern,
            ValidationError::PatternTooLong { max: 100 },
            ValidationError::InvalidPatternCharacters,
            ValidationError::PatternTooDeep { max: 6 },
            ValidationError::TooManyGlobstars { max: 2 },
        ];
        let messages: std::collections::HashSet<String> =
            errors.iter().map(ToString::to_string).collect();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn capacity_display() {
        let err = CapacityError::new(CapacityKind::EventSubscriptions, 50);
        assert_eq!(
            err.to_string(),
            "Maximum of 50 event subscriptions per session reached"
        );
    }

    #[test]
    fn relay_error_is_transparent_for_wrapped_kinds() {
        let err: RelayError = ValidationError::PatternTooDeep { max: 6 }.into();
        assert_eq!(err.to_string(), "Pattern exceeds maximum depth of 6 segments");
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn namespace_message_names_namespace() {
        let err = ValidationError::NamespaceNotAllowed {
            namespace: "system".into(),
        };
        assert!(err.to_string().contains("'system'"));
    }

    #[test]
    fn only_closed_transport_is_fatal() {
        assert!(TransportError::Closed.is_fatal());
        assert!(!TransportError::QueueFull.is_fatal());
    }

    #[test]
    fn timeout_from_conversion() {
        let err: RelayError = TimeoutError {
            event_type: "agent.complete".into(),
            timeout: Duration::from_millis(10),
        }
        .into();
        assert_matches!(err, RelayError::Timeout(ref t) if t.event_type == "agent.complete");
    }

    #[test]
    fn unknown_session_display() {
        let err = RelayError::UnknownSession(SessionId::from("sess_x"));
        assert_eq!(err.to_string(), "Session not found: sess_x");
        assert_eq!(err.code(), "UNKNOWN_SESSION");
    }
}
