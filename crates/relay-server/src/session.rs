//! Registry of live client sessions.
//!
//! A session is created when a WebSocket connects and removed when it closes,
//! fails a write, goes idle, or the server shuts down. All socket writes and
//! closes go through [`SessionManager`].
//!
//! State (sessions, the connection index, and the channel reverse index) sits
//! behind one `RwLock`. The lock is never held while writing to a socket,
//! running an [`Unsubscribe`], or calling back into the bus: those steps work
//! on a snapshot taken under the lock and released before they start.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use relay_bus::Unsubscribe;
use relay_core::{
    CapacityError, CapacityKind, ConnectionId, RelayError, SessionId, TransportError,
};
use relay_settings::SessionLimits;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::frames;
use crate::metrics::{
    SESSIONS_ACTIVE, SESSIONS_EVICTED_TOTAL, SESSIONS_IDLE_CLOSED_TOTAL, WS_FRAMES_DROPPED_TOTAL,
};
use crate::rate_limit::{RateLimit, TokenBucket};
use crate::websocket::socket::SessionSocket;

/// Close code sent to sessions closed by [`SessionManager::cleanup`].
pub const IDLE_CLOSE_CODE: u16 = 4000;
/// Close reason sent to sessions closed by [`SessionManager::cleanup`].
pub const IDLE_CLOSE_REASON: &str = "idle timeout";

/// Redacted view of a session, safe to hand out. Carries no socket.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session ID.
    pub id: SessionId,
    /// User supplied at connect time, if any.
    pub user_id: Option<String>,
    /// When the session was created.
    pub connected_at: DateTime<Utc>,
    /// Last inbound activity.
    pub last_activity_at: DateTime<Utc>,
    /// Joined channels, sorted.
    pub channels: Vec<String>,
    /// Client-set metadata.
    pub metadata: Map<String, Value>,
    /// Patterns with an active bus subscription, sorted.
    pub event_subscriptions: Vec<String>,
}

struct Session {
    id: SessionId,
    socket: Arc<dyn SessionSocket>,
    user_id: Option<String>,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    channels: BTreeSet<String>,
    metadata: Map<String, Value>,
    bucket: TokenBucket,
    subscriptions: HashMap<String, Unsubscribe>,
}

impl Session {
    fn info(&self) -> SessionInfo {
        let mut event_subscriptions: Vec<String> = self.subscriptions.keys().cloned().collect();
        event_subscriptions.sort();
        SessionInfo {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at,
            channels: self.channels.iter().cloned().collect(),
            metadata: self.metadata.clone(),
            event_subscriptions,
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    by_connection: HashMap<ConnectionId, SessionId>,
    channels: HashMap<String, HashSet<SessionId>>,
}

impl Registry {
    /// Take a session out of every index.
    fn detach(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        let _ = self.by_connection.remove(session.socket.connection_id());
        for channel in &session.channels {
            self.leave_channel(channel, &session.id);
        }
        Some(session)
    }

    fn leave_channel(&mut self, channel: &str, id: &SessionId) {
        if let Some(members) = self.channels.get_mut(channel) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = self.channels.remove(channel);
            }
        }
    }

    fn socket_of(&self, id: &str) -> Option<Arc<dyn SessionSocket>> {
        self.sessions.get(id).map(|s| s.socket.clone())
    }
}

type Target = (SessionId, Arc<dyn SessionSocket>);

/// Owns every live session and all writes to their sockets.
pub struct SessionManager {
    registry: RwLock<Registry>,
    limits: SessionLimits,
    rate: RateLimit,
}

impl SessionManager {
    /// Create an empty registry enforcing `limits`.
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            rate: RateLimit::from_limits(&limits),
            registry: RwLock::new(Registry::default()),
            limits,
        }
    }

    /// The limits this registry enforces.
    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Register a session for `socket`.
    ///
    /// A socket maps to at most one session; registering the same connection
    /// again returns the existing session.
    pub fn create(&self, socket: Arc<dyn SessionSocket>, user_id: Option<String>) -> SessionInfo {
        let mut registry = self.registry.write();
        if let Some(existing) = registry
            .by_connection
            .get(socket.connection_id())
            .and_then(|id| registry.sessions.get(id))
        {
            debug!(session_id = %existing.id, "connection already has a session");
            return existing.info();
        }

        let now = Utc::now();
        let session = Session {
            id: SessionId::new(),
            user_id,
            connected_at: now,
            last_activity: Instant::now(),
            last_activity_at: now,
            channels: BTreeSet::new(),
            metadata: Map::new(),
            bucket: TokenBucket::full(self.rate, Instant::now()),
            subscriptions: HashMap::new(),
            socket,
        };
        let info = session.info();
        let _ = registry
            .by_connection
            .insert(session.socket.connection_id().clone(), session.id.clone());
        let _ = registry.sessions.insert(session.id.clone(), session);
        let total = registry.sessions.len();
        drop(registry);

        gauge!(SESSIONS_ACTIVE).set(count_f64(total));
        info!(session_id = %info.id, user_id = ?info.user_id, "session created");
        info
    }

    /// Remove a session, its channel memberships and its bus subscriptions.
    ///
    /// Idempotent; returns whether the session existed. Does not close the
    /// socket.
    pub fn remove(&self, id: &str) -> bool {
        let mut registry = self.registry.write();
        let Some(session) = registry.detach(id) else {
            return false;
        };
        let total = registry.sessions.len();
        drop(registry);

        let subscriptions = session.subscriptions.len();
        for (_, handle) in session.subscriptions {
            let _ = handle.unsubscribe();
        }
        gauge!(SESSIONS_ACTIVE).set(count_f64(total));
        info!(session_id = %session.id, subscriptions, "session removed");
        true
    }

    /// Remove the session bound to a connection.
    pub fn remove_by_socket(&self, connection_id: &ConnectionId) -> bool {
        let id = self.registry.read().by_connection.get(connection_id).cloned();
        id.is_some_and(|id| self.remove(&id))
    }

    /// Record activity; resets the idle clock. Returns whether the session
    /// exists.
    pub fn touch(&self, id: &str) -> bool {
        let mut registry = self.registry.write();
        let Some(session) = registry.sessions.get_mut(id) else {
            return false;
        };
        session.last_activity = Instant::now();
        session.last_activity_at = Utc::now();
        true
    }

    /// Take one token from the session's bucket. Unknown sessions are refused.
    pub fn consume_rate_limit(&self, id: &str) -> bool {
        let mut registry = self.registry.write();
        registry
            .sessions
            .get_mut(id)
            .is_some_and(|s| s.bucket.try_consume(self.rate, Instant::now()))
    }

    // ── Lookup ──────────────────────────────────────────────────────

    /// Redacted view of one session.
    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.registry.read().sessions.get(id).map(Session::info)
    }

    /// Redacted view of the session bound to a connection.
    pub fn get_by_socket(&self, connection_id: &ConnectionId) -> Option<SessionInfo> {
        let registry = self.registry.read();
        registry
            .by_connection
            .get(connection_id)
            .and_then(|id| registry.sessions.get(id))
            .map(Session::info)
    }

    /// Redacted views of every session, ordered by ID (creation order).
    pub fn get_all(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self
            .registry
            .read()
            .sessions
            .values()
            .map(Session::info)
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.read().sessions.len()
    }

    // ── Channels ────────────────────────────────────────────────────

    /// Join a channel. Re-joining is always accepted; a new join past the
    /// channel cap is refused.
    pub fn subscribe_to_channel(&self, id: &str, channel: &str) -> bool {
        let mut registry = self.registry.write();
        let Registry {
            sessions, channels, ..
        } = &mut *registry;
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.channels.contains(channel) {
            return true;
        }
        if session.channels.len() >= self.limits.max_channels {
            let err = CapacityError::new(CapacityKind::Channels, self.limits.max_channels);
            warn!(
                session_id = id,
                channel,
                error = %err,
                "channel limit reached (possible subscription leak)"
            );
            return false;
        }
        let _ = session.channels.insert(channel.to_owned());
        let _ = channels
            .entry(channel.to_owned())
            .or_default()
            .insert(session.id.clone());
        debug!(session_id = id, channel, "joined channel");
        true
    }

    /// Leave a channel. Returns whether the session was a member.
    pub fn unsubscribe_from_channel(&self, id: &str, channel: &str) -> bool {
        let mut registry = self.registry.write();
        let Some(session) = registry.sessions.get_mut(id) else {
            return false;
        };
        if !session.channels.remove(channel) {
            return false;
        }
        let session_id = session.id.clone();
        registry.leave_channel(channel, &session_id);
        debug!(session_id = id, channel, "left channel");
        true
    }

    /// Redacted views of a channel's members.
    pub fn get_channel_subscribers(&self, channel: &str) -> Vec<SessionInfo> {
        let registry = self.registry.read();
        let Some(members) = registry.channels.get(channel) else {
            return Vec::new();
        };
        let mut infos: Vec<SessionInfo> = members
            .iter()
            .filter_map(|id| registry.sessions.get(id))
            .map(Session::info)
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    // ── Metadata ────────────────────────────────────────────────────

    /// Store a metadata entry. Oversized keys or values, unserializable
    /// values, and new keys past the key cap are silently ignored.
    pub fn set_metadata<T: Serialize + ?Sized>(&self, id: &str, key: &str, value: &T) -> bool {
        if key.chars().count() > self.limits.max_metadata_key_len {
            debug!(session_id = id, "metadata key too long");
            return false;
        }
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                debug!(session_id = id, key, error = %e, "metadata value not serializable");
                return false;
            }
        };
        let size = serde_json::to_vec(&value).map_or(usize::MAX, |bytes| bytes.len());
        if size > self.limits.max_metadata_value_bytes {
            debug!(session_id = id, key, size, "metadata value too large");
            return false;
        }

        let mut registry = self.registry.write();
        let Some(session) = registry.sessions.get_mut(id) else {
            return false;
        };
        if !session.metadata.contains_key(key)
            && session.metadata.len() >= self.limits.max_metadata_keys
        {
            let err = CapacityError::new(CapacityKind::MetadataKeys, self.limits.max_metadata_keys);
            warn!(session_id = id, key, error = %err, "metadata key limit reached");
            return false;
        }
        let _ = session.metadata.insert(key.to_owned(), value);
        true
    }

    /// Read a metadata entry.
    pub fn get_metadata(&self, id: &str, key: &str) -> Option<Value> {
        self.registry
            .read()
            .sessions
            .get(id)
            .and_then(|s| s.metadata.get(key).cloned())
    }

    // ── Event subscriptions ─────────────────────────────────────────

    /// Record a bus subscription held on behalf of a session.
    ///
    /// Takes ownership of `handle`. Replacing an existing pattern tears down
    /// the previous handle and does not count against the cap. On failure the
    /// given handle is torn down before returning.
    pub fn add_event_subscription(
        &self,
        id: &str,
        pattern: &str,
        handle: Unsubscribe,
    ) -> Result<(), RelayError> {
        let outcome = {
            let mut registry = self.registry.write();
            match registry.sessions.get_mut(id) {
                None => Err((RelayError::UnknownSession(SessionId::from(id)), handle)),
                Some(session)
                    if !session.subscriptions.contains_key(pattern)
                        && session.subscriptions.len() >= self.limits.max_event_subscriptions =>
                {
                    let limit = self.limits.max_event_subscriptions;
                    let err = CapacityError::new(CapacityKind::EventSubscriptions, limit);
                    Err((RelayError::from(err), handle))
                }
                Some(session) => Ok(session.subscriptions.insert(pattern.to_owned(), handle)),
            }
        };

        match outcome {
            Ok(replaced) => {
                if let Some(previous) = replaced {
                    let _ = previous.unsubscribe();
                    debug!(session_id = id, pattern, "replaced event subscription");
                }
                Ok(())
            }
            Err((err, handle)) => {
                let _ = handle.unsubscribe();
                if matches!(err, RelayError::Capacity(_)) {
                    warn!(
                        session_id = id,
                        pattern,
                        error = %err,
                        "event subscription refused (possible subscription leak)"
                    );
                }
                Err(err)
            }
        }
    }

    /// Drop a session's subscription to `pattern`. Returns whether it existed.
    pub fn remove_event_subscription(&self, id: &str, pattern: &str) -> bool {
        let handle = self
            .registry
            .write()
            .sessions
            .get_mut(id)
            .and_then(|s| s.subscriptions.remove(pattern));
        handle.is_some_and(|h| {
            let _ = h.unsubscribe();
            true
        })
    }

    /// Number of bus subscriptions a session holds.
    pub fn event_subscription_count(&self, id: &str) -> usize {
        self.registry
            .read()
            .sessions
            .get(id)
            .map_or(0, |s| s.subscriptions.len())
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send one frame to one session.
    ///
    /// Returns `false` without writing if the session is unknown or its socket
    /// is closed. A failed write evicts the session; a full queue only drops
    /// the frame.
    pub fn send<T: Serialize + ?Sized>(&self, id: &str, frame_type: &str, payload: &T) -> bool {
        let Some(socket) = self.registry.read().socket_of(id) else {
            return false;
        };
        if !socket.is_open() {
            return false;
        }
        let text = match frames::encode(frame_type, payload) {
            Ok(text) => text,
            Err(e) => {
                let err = TransportError::from(e);
                warn!(session_id = id, frame_type, error = %err, "failed to serialize frame");
                return false;
            }
        };
        self.deliver(id, &*socket, text)
    }

    /// Send one frame to every open session. Returns the number reached.
    pub fn broadcast<T: Serialize + ?Sized>(&self, frame_type: &str, payload: &T) -> usize {
        let targets: Vec<Target> = self
            .registry
            .read()
            .sessions
            .values()
            .map(|s| (s.id.clone(), s.socket.clone()))
            .collect();
        self.fan_out(targets, frame_type, payload)
    }

    /// Send one frame to every open member of `channel`.
    pub fn broadcast_to_channel<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        frame_type: &str,
        payload: &T,
    ) -> usize {
        let targets: Vec<Target> = {
            let registry = self.registry.read();
            registry
                .channels
                .get(channel)
                .into_iter()
                .flatten()
                .filter_map(|id| registry.sessions.get(id))
                .map(|s| (s.id.clone(), s.socket.clone()))
                .collect()
        };
        self.fan_out(targets, frame_type, payload)
    }

    fn fan_out<T: Serialize + ?Sized>(
        &self,
        targets: Vec<Target>,
        frame_type: &str,
        payload: &T,
    ) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let text = match frames::encode(frame_type, payload) {
            Ok(text) => text,
            Err(e) => {
                let err = TransportError::from(e);
                warn!(frame_type, error = %err, "failed to serialize broadcast frame");
                return 0;
            }
        };
        let reached = targets
            .into_iter()
            .filter(|(id, socket)| socket.is_open() && self.deliver(id, &**socket, text.clone()))
            .count();
        debug!(frame_type, reached, "broadcast frame");
        reached
    }

    fn deliver(&self, id: &str, socket: &dyn SessionSocket, text: Arc<String>) -> bool {
        match socket.send_text(text) {
            Ok(()) => true,
            Err(TransportError::QueueFull) => {
                counter!(WS_FRAMES_DROPPED_TOTAL).increment(1);
                debug!(session_id = id, "outbound queue full, frame dropped");
                false
            }
            Err(e) if e.is_fatal() => {
                warn!(session_id = id, error = %e, "write failed, evicting session");
                counter!(SESSIONS_EVICTED_TOTAL).increment(1);
                let _ = self.remove(id);
                false
            }
            Err(e) => {
                warn!(session_id = id, error = %e, "write failed");
                false
            }
        }
    }

    // ── Sweeping ────────────────────────────────────────────────────

    /// Close and remove every session idle for longer than `max_idle`.
    ///
    /// Close failures are ignored; the session is removed regardless.
    /// Returns the number removed.
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let idle: Vec<Target> = self
            .registry
            .read()
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_activity) > max_idle)
            .map(|s| (s.id.clone(), s.socket.clone()))
            .collect();

        let removed = self.close_targets(idle, IDLE_CLOSE_CODE, IDLE_CLOSE_REASON);
        if removed > 0 {
            counter!(SESSIONS_IDLE_CLOSED_TOTAL).increment(removed as u64);
            info!(removed, ?max_idle, "closed idle sessions");
        }
        removed
    }

    /// Close and remove every session. Returns the number removed.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let all: Vec<Target> = self
            .registry
            .read()
            .sessions
            .values()
            .map(|s| (s.id.clone(), s.socket.clone()))
            .collect();
        self.close_targets(all, code, reason)
    }

    fn close_targets(&self, targets: Vec<Target>, code: u16, reason: &str) -> usize {
        targets
            .into_iter()
            .filter(|(id, socket)| {
                if let Err(e) = socket.close(code, reason) {
                    debug!(session_id = %id, error = %e, "close failed, removing anyway");
                }
                self.remove(id)
            })
            .count()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_f64(n: usize) -> f64 {
    n as f64
}
