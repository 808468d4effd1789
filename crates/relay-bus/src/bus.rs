//! The event bus: subscription indices and synchronous dispatch.
//!
//! Three independent indices (exact type, category, pattern) map a key to an
//! ordered list of handlers. Each list is capped; registrations past the cap
//! are refused with an inert [`Unsubscribe`] and a leak warning.
//!
//! One dispatch runs exact-type handlers, then category handlers, then the
//! handlers of every matching pattern. All three lists are snapshotted under a
//! single read lock before the first handler runs, so handlers may subscribe
//! or unsubscribe freely without affecting the pass in progress.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use relay_core::{CapacityError, CapacityKind, RelayError, TimeoutError};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::event::{EventCategory, TypedEvent};
use crate::handler::{Handler, HandlerFuture, HandlerOutput, erase};
use crate::known::KnownEvent;
use crate::pattern::Pattern;

/// Default cap on handlers registered under one key.
pub const DEFAULT_MAX_HANDLERS_PER_KEY: usize = 100;

/// Default deadline for [`EventBus::wait_for`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    id: u64,
    handler: Handler,
}

struct PatternSlot {
    pattern: Pattern,
    entries: Vec<Entry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SubscriptionKey {
    Type(String),
    Category(EventCategory),
    Pattern(String),
}

#[derive(Default)]
struct Indices {
    by_type: HashMap<String, Vec<Entry>>,
    by_category: HashMap<EventCategory, Vec<Entry>>,
    by_pattern: HashMap<String, PatternSlot>,
}

impl Indices {
    fn insert(
        &mut self,
        key: &SubscriptionKey,
        entry: Entry,
        max: usize,
    ) -> Result<(), CapacityError> {
        match key {
            SubscriptionKey::Type(t) => {
                push_capped(self.by_type.entry(t.clone()).or_default(), entry, max)
            }
            SubscriptionKey::Category(c) => {
                push_capped(self.by_category.entry(*c).or_default(), entry, max)
            }
            SubscriptionKey::Pattern(p) => {
                let slot = self.by_pattern.entry(p.clone()).or_insert_with(|| PatternSlot {
                    pattern: Pattern::parse(p),
                    entries: Vec::new(),
                });
                let result = push_capped(&mut slot.entries, entry, max);
                if slot.entries.is_empty() {
                    let _ = self.by_pattern.remove(p);
                }
                result
            }
        }
    }

    fn remove(&mut self, key: &SubscriptionKey, id: u64) -> bool {
        match key {
            SubscriptionKey::Type(t) => remove_entry(&mut self.by_type, t, id, |v| v),
            SubscriptionKey::Category(c) => remove_entry(&mut self.by_category, c, id, |v| v),
            SubscriptionKey::Pattern(p) => {
                remove_entry(&mut self.by_pattern, p, id, |s| &mut s.entries)
            }
        }
    }

    fn snapshot(&self, event: &TypedEvent) -> [Vec<Handler>; 3] {
        let exact = self
            .by_type
            .get(&event.event_type)
            .map(|v| clone_handlers(v))
            .unwrap_or_default();
        let category = self
            .by_category
            .get(&event.category)
            .map(|v| clone_handlers(v))
            .unwrap_or_default();
        let patterns = self
            .by_pattern
            .values()
            .filter(|slot| slot.pattern.matches(&event.event_type))
            .flat_map(|slot| slot.entries.iter().map(|e| e.handler.clone()))
            .collect();
        [exact, category, patterns]
    }

    fn handler_count(&self) -> usize {
        self.by_type.values().map(Vec::len).sum::<usize>()
            + self.by_category.values().map(Vec::len).sum::<usize>()
            + self.by_pattern.values().map(|s| s.entries.len()).sum::<usize>()
    }
}

fn push_capped(entries: &mut Vec<Entry>, entry: Entry, max: usize) -> Result<(), CapacityError> {
    if entries.len() >= max {
        return Err(CapacityError::new(CapacityKind::Handlers, max));
    }
    entries.push(entry);
    Ok(())
}

fn remove_entry<K, V>(
    map: &mut HashMap<K, V>,
    key: &K,
    id: u64,
    entries_of: impl Fn(&mut V) -> &mut Vec<Entry>,
) -> bool
where
    K: Eq + Hash,
{
    let Some(slot) = map.get_mut(key) else {
        return false;
    };
    let entries = entries_of(slot);
    let before = entries.len();
    entries.retain(|e| e.id != id);
    let removed = entries.len() != before;
    if entries.is_empty() {
        let _ = map.remove(key);
    }
    removed
}

fn clone_handlers(entries: &[Entry]) -> Vec<Handler> {
    entries.iter().map(|e| e.handler.clone()).collect()
}

/// Snapshot of the keys that currently have handlers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionKeys {
    /// Exact event types.
    pub types: Vec<String>,
    /// Categories.
    pub categories: Vec<EventCategory>,
    /// Wildcard patterns, as written.
    pub patterns: Vec<String>,
}

struct BusInner {
    indices: RwLock<Indices>,
    next_id: AtomicU64,
    max_handlers_per_key: usize,
    default_wait_timeout: Duration,
}

/// Capability to remove one registered handler.
#[derive(Clone)]
struct Registration {
    bus: Weak<BusInner>,
    key: SubscriptionKey,
    id: u64,
}

impl Registration {
    fn remove(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|inner| inner.indices.write().remove(&self.key, self.id))
    }
}

/// Handle returned by every subscribe call.
///
/// Dropping the handle does not unsubscribe; call [`Unsubscribe::unsubscribe`].
/// Handles for refused registrations are inert (see [`Unsubscribe::is_active`]).
#[must_use = "dropping the handle keeps the handler registered for the bus lifetime"]
pub struct Unsubscribe {
    registration: Option<Registration>,
}

impl Unsubscribe {
    /// A handle that does nothing.
    pub fn noop() -> Self {
        Self { registration: None }
    }

    /// Whether this handle refers to a registration that was accepted.
    pub fn is_active(&self) -> bool {
        self.registration.is_some()
    }

    /// Remove the handler. Returns whether it was still registered.
    pub fn unsubscribe(mut self) -> bool {
        self.registration.take().is_some_and(|r| r.remove())
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.registration {
            Some(r) => f
                .debug_struct("Unsubscribe")
                .field("key", &r.key)
                .field("id", &r.id)
                .finish(),
            None => f.write_str("Unsubscribe(noop)"),
        }
    }
}

/// Typed, synchronous, in-process publish/subscribe bus.
///
/// Cheap to clone; clones share the same subscription indices.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_HANDLERS_PER_KEY, DEFAULT_WAIT_TIMEOUT)
    }

    /// Create a bus with an explicit per-key handler cap and `wait_for`
    /// default deadline.
    pub fn with_limits(max_handlers_per_key: usize, default_wait_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                indices: RwLock::new(Indices::default()),
                next_id: AtomicU64::new(1),
                max_handlers_per_key,
                default_wait_timeout,
            }),
        }
    }

    // ── Emit ────────────────────────────────────────────────────────

    /// Build an event (category derived from `event_type`) and dispatch it.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: Value,
    ) -> TypedEvent {
        let event = TypedEvent::new(event_type, source, data);
        self.dispatch(&event);
        event
    }

    /// Dispatch a pre-built event as is.
    pub fn emit_raw(&self, event: &TypedEvent) {
        self.dispatch(event);
    }

    /// Serialize a registered payload type and dispatch it under its type.
    ///
    /// Returns `None` (after logging) if the payload fails to serialize.
    pub fn emit_typed<E: KnownEvent>(
        &self,
        source: impl Into<String>,
        payload: &E,
    ) -> Option<TypedEvent> {
        match serde_json::to_value(payload) {
            Ok(data) => Some(self.emit(E::TYPE, source, data)),
            Err(e) => {
                warn!(event_type = E::TYPE, error = %e, "failed to serialize event payload");
                None
            }
        }
    }

    // ── Subscribe ───────────────────────────────────────────────────

    /// Subscribe to one exact event type.
    pub fn on<F, R>(&self, event_type: impl Into<String>, handler: F) -> Unsubscribe
    where
        F: Fn(&TypedEvent) -> R + Send + Sync + 'static,
        R: Into<HandlerOutput>,
    {
        self.register(SubscriptionKey::Type(event_type.into()), erase(handler))
    }

    /// Alias of [`EventBus::on`] for handlers that accept any payload shape.
    pub fn on_any<F, R>(&self, event_type: impl Into<String>, handler: F) -> Unsubscribe
    where
        F: Fn(&TypedEvent) -> R + Send + Sync + 'static,
        R: Into<HandlerOutput>,
    {
        self.on(event_type, handler)
    }

    /// Subscribe to one exact type; the handler runs at most once.
    ///
    /// The handler removes itself before running. A dispatch already in
    /// progress keeps its snapshot, so a concurrent emit may still reach the
    /// wrapper; the fired flag turns that call into a no-op.
    pub fn once<F, R>(&self, event_type: impl Into<String>, handler: F) -> Unsubscribe
    where
        F: Fn(&TypedEvent) -> R + Send + Sync + 'static,
        R: Into<HandlerOutput>,
    {
        let key = SubscriptionKey::Type(event_type.into());
        let registration = self.registration_for(key);
        let own = registration.clone();
        let fired = AtomicBool::new(false);
        let wrapped = move |event: &TypedEvent| -> HandlerOutput {
            if fired.swap(true, Ordering::AcqRel) {
                return HandlerOutput::Done;
            }
            let _ = own.remove();
            handler(event).into()
        };
        self.insert(registration, Arc::new(wrapped))
    }

    /// Subscribe to every event of a category.
    pub fn on_category<F, R>(&self, category: EventCategory, handler: F) -> Unsubscribe
    where
        F: Fn(&TypedEvent) -> R + Send + Sync + 'static,
        R: Into<HandlerOutput>,
    {
        self.register(SubscriptionKey::Category(category), erase(handler))
    }

    /// Subscribe to every event whose type matches a wildcard pattern.
    pub fn on_pattern<F, R>(&self, pattern: impl Into<String>, handler: F) -> Unsubscribe
    where
        F: Fn(&TypedEvent) -> R + Send + Sync + 'static,
        R: Into<HandlerOutput>,
    {
        self.register(SubscriptionKey::Pattern(pattern.into()), erase(handler))
    }

    /// Wait for the next event of `event_type`.
    ///
    /// `timeout` defaults to the bus's configured deadline. The temporary
    /// subscription is removed whichever way the wait ends. Fails with
    /// [`RelayError::Timeout`] when the deadline passes (also when the bus is
    /// cleared mid-wait), or immediately with
    /// [`RelayError::Capacity`] if the type's handler list is full.
    pub async fn wait_for(
        &self,
        event_type: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<TypedEvent, RelayError> {
        let event_type = event_type.into();
        let timeout = timeout.unwrap_or(self.inner.default_wait_timeout);
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let subscription = self.once(event_type.clone(), move |event: &TypedEvent| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(event.clone());
            }
        });
        if !subscription.is_active() {
            return Err(
                CapacityError::new(CapacityKind::Handlers, self.inner.max_handlers_per_key).into(),
            );
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let outcome = tokio::time::timeout_at(deadline, rx).await;
        let _ = subscription.unsubscribe();
        match outcome {
            Ok(Ok(event)) => return Ok(event),
            // Handler dropped by `clear`; the deadline still governs rejection.
            Ok(Err(_)) => tokio::time::sleep_until(deadline).await,
            Err(_) => {}
        }
        debug!(event_type, ?timeout, "wait_for timed out");
        Err(TimeoutError { event_type, timeout }.into())
    }

    /// Drop every registered handler.
    pub fn clear(&self) {
        let mut indices = self.inner.indices.write();
        *indices = Indices::default();
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Total handlers across all three indices.
    pub fn handler_count(&self) -> usize {
        self.inner.indices.read().handler_count()
    }

    /// Cap on handlers registered under one key.
    pub fn max_handlers_per_key(&self) -> usize {
        self.inner.max_handlers_per_key
    }

    /// Number of distinct patterns with at least one handler.
    pub fn pattern_count(&self) -> usize {
        self.inner.indices.read().by_pattern.len()
    }

    /// Live subscription keys per index, sorted.
    pub fn subscription_keys(&self) -> SubscriptionKeys {
        let indices = self.inner.indices.read();
        let mut keys = SubscriptionKeys {
            types: indices.by_type.keys().cloned().collect(),
            categories: indices.by_category.keys().copied().collect(),
            patterns: indices.by_pattern.keys().cloned().collect(),
        };
        drop(indices);
        keys.types.sort();
        keys.categories.sort_by_key(|c| c.as_str());
        keys.patterns.sort();
        keys
    }

    // ── Internals ───────────────────────────────────────────────────

    fn registration_for(&self, key: SubscriptionKey) -> Registration {
        Registration {
            bus: Arc::downgrade(&self.inner),
            key,
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn register(&self, key: SubscriptionKey, handler: Handler) -> Unsubscribe {
        let registration = self.registration_for(key);
        self.insert(registration, handler)
    }

    fn insert(&self, registration: Registration, handler: Handler) -> Unsubscribe {
        let entry = Entry {
            id: registration.id,
            handler,
        };
        let max = self.inner.max_handlers_per_key;
        let result = self.inner.indices.write().insert(&registration.key, entry, max);
        match result {
            Ok(()) => Unsubscribe {
                registration: Some(registration),
            },
            Err(e) => {
                warn!(
                    key = ?registration.key,
                    limit = e.limit,
                    "handler limit reached for key, registration refused (possible subscription leak)"
                );
                Unsubscribe::noop()
            }
        }
    }

    fn dispatch(&self, event: &TypedEvent) {
        let phases = self.inner.indices.read().snapshot(event);
        for (phase, handlers) in ["type", "category", "pattern"].into_iter().zip(phases) {
            for handler in &handlers {
                invoke(handler, event, phase);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("max_handlers_per_key", &self.inner.max_handlers_per_key)
            .finish()
    }
}

/// Run one handler, isolating the dispatcher from its failures.
fn invoke(handler: &Handler, event: &TypedEvent, phase: &'static str) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(HandlerOutput::Done) => {}
        Ok(HandlerOutput::Failed(err)) => {
            error!(event_type = %event.event_type, phase, error = %err, "event handler failed");
        }
        Ok(HandlerOutput::Task(task)) => spawn_detached(task, &event.event_type),
        Err(payload) => {
            error!(
                event_type = %event.event_type,
                phase,
                panic = panic_message(payload.as_ref()),
                "event handler panicked"
            );
        }
    }
}

fn spawn_detached(task: HandlerFuture, event_type: &str) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(event_type, "async handler outside a tokio runtime, task dropped");
        return;
    };
    let event_type = event_type.to_owned();
    let _ = runtime.spawn(async move {
        if let Err(err) = task.await {
            warn!(event_type, error = %err, "async event handler failed");
        }
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::known::SystemShutdown;
    use assert_matches::assert_matches;
    use relay_core::logging::capture_logs;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tracing::Level;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&TypedEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_e: &TypedEvent| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn recorder() -> (
        Arc<Mutex<Vec<String>>>,
        impl Fn(&str) -> Box<dyn Fn(&TypedEvent) + Send + Sync>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        (log, move |tag: &str| {
            let l = l.clone();
            let tag = tag.to_owned();
            Box::new(move |_e: &TypedEvent| l.lock().push(tag.clone()))
        })
    }

    #[test]
    fn emit_reaches_type_category_and_pattern_handlers() {
        let bus = EventBus::new();
        let (exact, h1) = counter();
        let (cat, h2) = counter();
        let (pat, h3) = counter();
        let (other, h4) = counter();
        let _ = bus.on("agent.complete", h1);
        let _ = bus.on_category(EventCategory::Agent, h2);
        let _ = bus.on_pattern("agent.*", h3);
        let _ = bus.on("tool.complete", h4);

        let event = bus.emit("agent.complete", "orchestrator", json!({"agentId": "a1"}));

        assert_eq!(event.category, EventCategory::Agent);
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(cat.load(Ordering::SeqCst), 1);
        assert_eq!(pat.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn phases_run_in_order() {
        let bus = EventBus::new();
        let (log, tagged) = recorder();
        let _ = bus.on_pattern("**", tagged("pattern"));
        let _ = bus.on_category(EventCategory::Tool, tagged("category"));
        let _ = bus.on("tool.run", tagged("type"));

        let _ = bus.emit("tool.run", "test", json!(null));

        assert_eq!(*log.lock(), ["type", "category", "pattern"]);
    }

    #[test]
    fn disjoint_keys_are_not_invoked() {
        let bus = EventBus::new();
        let (n, h1) = counter();
        let (m, h2) = counter();
        let _ = bus.on_pattern("agent.*", h1);
        let _ = bus.on_category(EventCategory::Resource, h2);

        let _ = bus.emit("agent.step.detail", "test", json!(null));

        assert_eq!(n.load(Ordering::SeqCst), 0);
        assert_eq!(m.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_namespace_dispatches_to_system_category() {
        let bus = EventBus::new();
        let (n, h) = counter();
        let _ = bus.on_category(EventCategory::System, h);
        let _ = bus.emit("workflow.done", "engine", json!({}));
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_raw_keeps_prebuilt_category() {
        let bus = EventBus::new();
        let (system, h1) = counter();
        let (client, h2) = counter();
        let _ = bus.on_category(EventCategory::System, h1);
        let _ = bus.on_category(EventCategory::Client, h2);

        let event =
            TypedEvent::with_category("client.ping", EventCategory::Client, "ws:s1", json!(1));
        bus.emit_raw(&event);

        assert_eq!(system.load(Ordering::SeqCst), 0);
        assert_eq!(client.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_typed_uses_registered_type() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let _ = bus.on(SystemShutdown::TYPE, move |e: &TypedEvent| {
            *s.lock() = Some(e.data.clone());
        });

        let event = bus
            .emit_typed("server", &SystemShutdown { reason: "signal".into() })
            .unwrap();

        assert_eq!(event.event_type, "system.shutdown");
        assert_eq!(seen.lock().clone().unwrap()["reason"], "signal");
    }

    #[test]
    fn unsubscribe_stops_delivery_and_cleans_index() {
        let bus = EventBus::new();
        let (n, h) = counter();
        let unsub = bus.on_pattern("agent.**", h);
        assert_eq!(bus.pattern_count(), 1);

        assert!(unsub.unsubscribe());
        let _ = bus.emit("agent.x", "test", json!(null));

        assert_eq!(n.load(Ordering::SeqCst), 0);
        assert_eq!(bus.pattern_count(), 0);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn unsubscribe_only_removes_its_own_handler() {
        let bus = EventBus::new();
        let (a, h1) = counter();
        let (b, h2) = counter();
        let first = bus.on("x.y", h1);
        let _second = bus.on("x.y", h2);

        assert!(first.unsubscribe());
        let _ = bus.emit("x.y", "test", json!(null));

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_fires_at_most_once() {
        let bus = EventBus::new();
        let (n, h) = counter();
        let _ = bus.once("agent.complete", h);

        for _ in 0..5 {
            let _ = bus.emit("agent.complete", "test", json!(null));
        }

        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn once_unsubscribed_before_firing_never_runs() {
        let bus = EventBus::new();
        let (n, h) = counter();
        let unsub = bus.once("a.b", h);
        assert!(unsub.unsubscribe());
        let _ = bus.emit("a.b", "test", json!(null));
        assert_eq!(n.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscribing_during_dispatch_affects_only_future_dispatches() {
        let bus = EventBus::new();
        let (late, late_handler) = counter();
        let late_handler = Arc::new(late_handler);
        let bus2 = bus.clone();
        let _ = bus.on("a.b", move |_e: &TypedEvent| {
            let h = late_handler.clone();
            let _ = bus2.on("a.b", move |e: &TypedEvent| h(e));
        });

        let _ = bus.emit("a.b", "test", json!(null));
        assert_eq!(late.load(Ordering::SeqCst), 0);

        let _ = bus.emit("a.b", "test", json!(null));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribing_a_later_handler_mid_dispatch_does_not_skip_it() {
        let bus = EventBus::new();
        let (second, h2) = counter();
        let slot: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let _ = bus.on("a.b", move |_e: &TypedEvent| {
            if let Some(u) = s.lock().take() {
                let _ = u.unsubscribe();
            }
        });
        *slot.lock() = Some(bus.on("a.b", h2));

        let _ = bus.emit("a.b", "test", json!(null));
        assert_eq!(second.load(Ordering::SeqCst), 1);

        let _ = bus.emit("a.b", "test", json!(null));
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let (logs, _guard) = capture_logs();
        let bus = EventBus::new();
        let (n, h) = counter();
        let _ = bus.on("a.b", |_e: &TypedEvent| Err::<(), _>(anyhow::anyhow!("boom")));
        let _ = bus.on("a.b", |_e: &TypedEvent| -> HandlerOutput { panic!("kaboom") });
        let _ = bus.on("a.b", h);

        let _ = bus.emit("a.b", "test", json!(null));

        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert!(logs.has_event(Level::ERROR, "event handler failed"));
        assert!(logs.has_event(Level::ERROR, "event handler panicked"));
    }

    #[test]
    fn handler_cap_refuses_and_warns() {
        let (logs, _guard) = capture_logs();
        let bus = EventBus::with_limits(3, DEFAULT_WAIT_TIMEOUT);
        for _ in 0..3 {
            assert!(bus.on("a.b", |_e: &TypedEvent| ()).is_active());
        }

        let refused = bus.on("a.b", |_e: &TypedEvent| ());

        assert!(!refused.is_active());
        assert!(!refused.unsubscribe());
        assert_eq!(bus.handler_count(), 3);
        assert!(logs.has_event(Level::WARN, "handler limit reached"));
        // Other keys are unaffected.
        assert!(bus.on("a.c", |_e: &TypedEvent| ()).is_active());
        assert!(bus.on_pattern("a.b", |_e: &TypedEvent| ()).is_active());
    }

    #[test]
    fn default_cap_is_one_hundred() {
        let bus = EventBus::new();
        let handles: Vec<_> = (0..100)
            .map(|_| bus.on_pattern("x.*", |_e: &TypedEvent| ()))
            .collect();
        assert!(handles.iter().all(Unsubscribe::is_active));
        assert!(!bus.on_pattern("x.*", |_e: &TypedEvent| ()).is_active());
    }

    #[test]
    fn subscription_keys_reflect_live_indices() {
        let bus = EventBus::new();
        let _ = bus.on("b.x", |_e: &TypedEvent| ());
        let _ = bus.on("a.x", |_e: &TypedEvent| ());
        let _ = bus.on_category(EventCategory::Tool, |_e: &TypedEvent| ());
        let unsub = bus.on_pattern("a.**", |_e: &TypedEvent| ());

        let keys = bus.subscription_keys();
        assert_eq!(keys.types, ["a.x", "b.x"]);
        assert_eq!(keys.categories, [EventCategory::Tool]);
        assert_eq!(keys.patterns, ["a.**"]);

        assert!(unsub.unsubscribe());
        assert!(bus.subscription_keys().patterns.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let bus = EventBus::new();
        let (n, h) = counter();
        let unsub = bus.on("a.b", h);
        let _ = bus.on_pattern("**", |_e: &TypedEvent| ());
        bus.clear();
        let _ = bus.emit("a.b", "test", json!(null));
        assert_eq!(n.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(), 0);
        assert!(!unsub.unsubscribe());
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_harmless() {
        let bus = EventBus::new();
        let unsub = bus.on("a.b", |_e: &TypedEvent| ());
        drop(bus);
        assert!(!unsub.unsubscribe());
    }

    #[tokio::test]
    async fn wait_for_resolves_with_next_event() {
        let bus = EventBus::new();
        let emitter = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = emitter.emit("agent.complete", "orchestrator", json!({"ok": true}));
        });

        let event = bus
            .wait_for("agent.complete", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(event.data["ok"], true);
        assert_eq!(bus.handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_and_unsubscribes() {
        let bus = EventBus::new();
        let result = bus.wait_for("never.happens", Some(Duration::from_millis(50))).await;

        assert_matches!(result, Err(RelayError::Timeout(ref t)) if t.event_type == "never.happens");
        assert_eq!(bus.handler_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_uses_configured_default() {
        let bus = EventBus::with_limits(10, Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        let result = bus.wait_for("x.y", None).await;
        assert_matches!(
            result,
            Err(RelayError::Timeout(ref t)) if t.timeout == Duration::from_secs(2)
        );
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_cleared_mid_wait_rejects_at_deadline() {
        let bus = EventBus::new();
        let waiter = bus.clone();
        let started = tokio::time::Instant::now();
        let wait = tokio::spawn(async move {
            waiter
                .wait_for("x.y", Some(Duration::from_secs(30)))
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(bus.handler_count(), 1);

        bus.clear();
        let result = wait.await.unwrap();

        assert_matches!(result, Err(RelayError::Timeout(ref t)) if t.event_type == "x.y");
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn wait_for_on_full_key_fails_fast() {
        let bus = EventBus::with_limits(1, DEFAULT_WAIT_TIMEOUT);
        let _ = bus.on("x.y", |_e: &TypedEvent| ());
        let result = bus.wait_for("x.y", None).await;
        assert_matches!(result, Err(RelayError::Capacity(_)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn async_handler_failure_is_logged_not_propagated() {
        let (logs, _guard) = capture_logs();
        let bus = EventBus::new();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done_tx = Mutex::new(Some(done_tx));
        let _ = bus.on("a.b", |_e: &TypedEvent| {
            HandlerOutput::task(async { Err(anyhow::anyhow!("late failure")) })
        });
        let _ = bus.on("a.b", move |_e: &TypedEvent| {
            let tx = done_tx.lock().take();
            HandlerOutput::task(async move {
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
                Ok(())
            })
        });

        let _ = bus.emit("a.b", "test", json!(null));
        done_rx.await.unwrap();
        tokio::task::yield_now().await;

        assert!(logs.has_event(Level::WARN, "async event handler failed"));
    }

    #[test]
    fn async_handler_without_runtime_is_dropped_with_warning() {
        let (logs, _guard) = capture_logs();
        let bus = EventBus::new();
        let _ = bus.on("a.b", |_e: &TypedEvent| HandlerOutput::task(async { Ok(()) }));
        let _ = bus.emit("a.b", "test", json!(null));
        assert!(logs.has_event(Level::WARN, "outside a tokio runtime"));
    }
}
