//! Exposes the event bus to WebSocket clients.
//!
//! Clients may subscribe to bus events by wildcard pattern and publish events
//! into the client namespaces. Every request is validated and always answered
//! with an acknowledgement frame; failures never propagate to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use metrics::counter;
use regex::Regex;
use relay_bus::{EventBus, EventCategory, TypedEvent, namespace_of};
use relay_core::{CapacityError, CapacityKind, RelayError, ValidationError};
use relay_settings::BridgeSettings;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::frames::{ForwardedEvent, PublishResult, SubscribedAck, UnsubscribedAck, types};
use crate::metrics::{BRIDGE_PUBLISHES_TOTAL, BRIDGE_REJECTIONS_TOTAL, BRIDGE_SUBSCRIPTIONS_TOTAL};
use crate::session::SessionManager;

static PATTERN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-.*]+$").unwrap());

/// Bridges client sessions to the [`EventBus`].
pub struct EventBusBridge {
    bus: EventBus,
    sessions: Arc<SessionManager>,
    settings: BridgeSettings,
    running: AtomicBool,
}

impl EventBusBridge {
    /// Create a stopped bridge.
    pub fn new(bus: EventBus, sessions: Arc<SessionManager>, settings: BridgeSettings) -> Self {
        Self {
            bus,
            sessions,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Accept subscribe and publish requests. Idempotent.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!("event bridge started");
        }
    }

    /// Refuse new subscribe and publish requests. Existing subscriptions keep
    /// forwarding. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("event bridge stopped");
        }
    }

    /// Whether the bridge accepts requests.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Subscribe a session to bus events matching `pattern`.
    ///
    /// Matching events are forwarded as `event:message` frames. A second
    /// subscribe to the same pattern replaces the first. Always acknowledged
    /// with `event:subscribed` when the session exists.
    pub fn subscribe(&self, session_id: &str, pattern: &str) -> bool {
        match self.try_subscribe(session_id, pattern) {
            Ok(()) => {
                counter!(BRIDGE_SUBSCRIPTIONS_TOTAL).increment(1);
                debug!(session_id, pattern, "bridge subscription added");
                let _ = self.sessions.send(
                    session_id,
                    types::EVENT_SUBSCRIBED,
                    &SubscribedAck {
                        pattern,
                        success: true,
                        error: None,
                    },
                );
                true
            }
            Err(err) => {
                counter!(BRIDGE_REJECTIONS_TOTAL, "op" => "subscribe").increment(1);
                debug!(
                    session_id,
                    pattern,
                    code = err.code(),
                    error = %err,
                    "bridge subscription rejected"
                );
                let _ = self.sessions.send(
                    session_id,
                    types::EVENT_SUBSCRIBED,
                    &SubscribedAck {
                        pattern,
                        success: false,
                        error: Some(err.to_string()),
                    },
                );
                false
            }
        }
    }

    fn try_subscribe(&self, session_id: &str, pattern: &str) -> Result<(), RelayError> {
        if !self.is_running() {
            return Err(RelayError::BridgeStopped);
        }
        if self.sessions.get(session_id).is_none() {
            return Err(RelayError::UnknownSession(session_id.into()));
        }
        self.validate_pattern(pattern)?;

        let sessions = self.sessions.clone();
        let target = session_id.to_owned();
        let handle = self.bus.on_pattern(pattern, move |event: &TypedEvent| {
            let forwarded = ForwardedEvent {
                event_type: &event.event_type,
                source: &event.source,
                data: &event.data,
                timestamp: &event.timestamp,
            };
            let _ = sessions.send(&target, types::EVENT_MESSAGE, &forwarded);
        });
        if !handle.is_active() {
            let limit = self.bus.max_handlers_per_key();
            return Err(CapacityError::new(CapacityKind::Handlers, limit).into());
        }
        self.sessions.add_event_subscription(session_id, pattern, handle)
    }

    /// Stop forwarding `pattern` to a session. Returns whether a subscription
    /// was removed; acknowledged with `event:unsubscribed` either way.
    pub fn unsubscribe(&self, session_id: &str, pattern: &str) -> bool {
        let removed = self.sessions.remove_event_subscription(session_id, pattern);
        debug!(session_id, pattern, removed, "bridge unsubscribe");
        let _ = self
            .sessions
            .send(session_id, types::EVENT_UNSUBSCRIBED, &UnsubscribedAck { pattern });
        removed
    }

    /// Emit a client event onto the bus.
    ///
    /// The event's category is taken from its namespace and its source is
    /// `ws:<session id>`. Acknowledged with `event:publish:ack` or
    /// `event:publish:error`.
    pub fn publish(&self, session_id: &str, event_type: &str, data: Value) -> bool {
        match self.try_publish(session_id, event_type, data) {
            Ok(()) => {
                counter!(BRIDGE_PUBLISHES_TOTAL).increment(1);
                let _ = self.sessions.send(
                    session_id,
                    types::EVENT_PUBLISH_ACK,
                    &PublishResult {
                        event_type,
                        error: None,
                    },
                );
                true
            }
            Err(err) => {
                counter!(BRIDGE_REJECTIONS_TOTAL, "op" => "publish").increment(1);
                debug!(
                    session_id,
                    event_type,
                    code = err.code(),
                    error = %err,
                    "client publish rejected"
                );
                let _ = self.sessions.send(
                    session_id,
                    types::EVENT_PUBLISH_ERROR,
                    &PublishResult {
                        event_type,
                        error: Some(err.to_string()),
                    },
                );
                false
            }
        }
    }

    fn try_publish(
        &self,
        session_id: &str,
        event_type: &str,
        data: Value,
    ) -> Result<(), RelayError> {
        if !self.is_running() {
            return Err(RelayError::BridgeStopped);
        }
        if self.sessions.get(session_id).is_none() {
            return Err(RelayError::UnknownSession(session_id.into()));
        }
        self.validate_event_type(event_type)?;

        let category =
            EventCategory::parse(namespace_of(event_type)).unwrap_or(EventCategory::System);
        let source = format!("ws:{session_id}");
        let event = TypedEvent::with_category(event_type, category, source, data);
        self.bus.emit_raw(&event);
        Ok(())
    }

    /// Check a subscription pattern against the bridge's limits.
    pub fn validate_pattern(&self, pattern: &str) -> Result<(), ValidationError> {
        if pattern.is_empty() {
            return Err(ValidationError::EmptyPattern);
        }
        if pattern.len() > self.settings.max_pattern_length {
            return Err(ValidationError::PatternTooLong {
                max: self.settings.max_pattern_length,
            });
        }
        if !PATTERN_CHARS.is_match(pattern) {
            return Err(ValidationError::InvalidPatternCharacters);
        }
        let segments: Vec<&str> = pattern.split('.').collect();
        if segments.len() > self.settings.max_pattern_depth {
            return Err(ValidationError::PatternTooDeep {
                max: self.settings.max_pattern_depth,
            });
        }
        if segments.iter().filter(|s| **s == "**").count() > self.settings.max_globstars {
            return Err(ValidationError::TooManyGlobstars {
                max: self.settings.max_globstars,
            });
        }
        Ok(())
    }

    /// Check a client-published event type.
    pub fn validate_event_type(&self, event_type: &str) -> Result<(), ValidationError> {
        if event_type.is_empty() {
            return Err(ValidationError::EmptyEventType);
        }
        if event_type.len() > self.settings.max_event_type_length {
            return Err(ValidationError::EventTypeTooLong {
                max: self.settings.max_event_type_length,
            });
        }
        let namespace = namespace_of(event_type);
        if !self.settings.allowed_publish_namespaces.iter().any(|ns| ns == namespace) {
            warn!(event_type, "client attempted publish outside allowed namespaces");
            return Err(ValidationError::NamespaceNotAllowed {
                namespace: namespace.to_owned(),
            });
        }
        Ok(())
    }
}
