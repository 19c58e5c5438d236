//! # Dispatcher
//!
//! Per-capability listener registry and synchronous delivery.
//!
//! Listeners are bucketed by [`EventType`] and kept in registration order
//! inside each bucket. A dispatch pass copies the bucket before invoking
//! anything, so handlers may register or unregister freely (including on the
//! dispatcher that is calling them) without affecting the pass in progress.
//! No lock is held while a listener runs.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::{
    event_bus::{ErrorEvent, ErrorReceiver, ErrorSeverity, Event, EventBus, EventReceiver, OriginId},
    event_registry::EventType,
};

#[derive(Debug, Error, Clone, PartialEq)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type ListenerResult = Result<(), ListenerError>;

type ListenerFn = dyn Fn(&Event) -> ListenerResult + Send + Sync;

/// Callback registered on a [`Dispatcher`].
///
/// Identity is the allocation: clones of one `Listener` are the same listener,
/// two `Listener`s built from equal closures are not.
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    /// Wraps a callback that cannot fail.
    pub fn infallible<F>(callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            callback(event);
            Ok(())
        })
    }

    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, event: &Event) -> ListenerResult {
        (self.0)(event)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Opaque token distinguishing otherwise identical registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerScope(u64);

impl ListenerScope {
    pub fn new() -> Self {
        Self(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerScope {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ListenerEntry {
    pub listener: Listener,
    pub scope: Option<ListenerScope>,
}

impl ListenerEntry {
    fn matches(&self, listener: &Listener, scope: Option<ListenerScope>) -> bool {
        self.listener.same_as(listener) && self.scope == scope
    }
}

pub struct Dispatcher {
    origin: OriginId,
    listeners: DashMap<EventType, Vec<ListenerEntry>>,
    tap: EventBus,
}

impl Dispatcher {
    pub fn new(origin: OriginId, tap_capacity: usize) -> Self {
        Self {
            origin,
            listeners: DashMap::new(),
            tap: EventBus::new(tap_capacity.max(1)),
        }
    }

    pub fn origin(&self) -> OriginId {
        self.origin
    }

    /// Adds a registration; an identical (type, listener, scope) triple is a no-op.
    /// Registrations for an empty type are ignored, since no such event is
    /// ever dispatched.
    pub fn register(
        &self,
        event_type: impl Into<EventType>,
        listener: &Listener,
        scope: Option<ListenerScope>,
    ) {
        let event_type = event_type.into();
        if event_type.is_empty() {
            warn!(origin = %self.origin, "ignoring listener for empty event type");
            return;
        }
        let mut bucket = self.listeners.entry(event_type.clone()).or_default();
        if bucket.iter().any(|entry| entry.matches(listener, scope)) {
            trace!(%event_type, "listener already registered");
            return;
        }
        bucket.push(ListenerEntry {
            listener: listener.clone(),
            scope,
        });
        trace!(%event_type, count = bucket.len(), "listener registered");
    }

    /// Removes an exact (type, listener, scope) match; absent entries are ignored.
    pub fn unregister(
        &self,
        event_type: impl Into<EventType>,
        listener: &Listener,
        scope: Option<ListenerScope>,
    ) {
        let event_type = event_type.into();
        if let Some(mut bucket) = self.listeners.get_mut(&event_type) {
            bucket.retain(|entry| !entry.matches(listener, scope));
        }
        self.listeners.remove_if(&event_type, |_, bucket| bucket.is_empty());
    }

    pub fn unregister_all(&self) {
        self.listeners.clear();
        debug!(origin = %self.origin, "all listeners removed");
    }

    pub fn has_listener(&self, event_type: &EventType) -> bool {
        self.listeners
            .get(event_type)
            .is_some_and(|bucket| !bucket.is_empty())
    }

    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.listeners
            .get(event_type)
            .map_or(0, |bucket| bucket.len())
    }

    /// Delivers `event` to the listeners registered for its type when the
    /// pass begins, in registration order.
    ///
    /// Returns `false` without invoking anything if the event type is empty
    /// or nobody listens for it. A listener that returns an error or panics
    /// is reported on the error channel and the pass continues.
    pub fn dispatch(&self, event: &Event) -> bool {
        if event.event_type().is_empty() {
            debug!(origin = %self.origin, "dropping event with empty type");
            return false;
        }

        let snapshot = match self.listeners.get(event.event_type()) {
            Some(bucket) if !bucket.is_empty() => bucket.clone(),
            _ => {
                trace!(event_type = %event.event_type(), "no listeners");
                return false;
            }
        };

        for entry in snapshot.iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| entry.listener.call(event)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report_failure(event, ErrorSeverity::Warning, e.to_string()),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.report_failure(event, ErrorSeverity::Error, message)
                }
            }
        }

        let _ = self.tap.publish(event.clone());
        true
    }

    /// Subscribes to dispatched events and listener failures.
    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        self.tap.subscribe()
    }

    fn report_failure(&self, event: &Event, severity: ErrorSeverity, message: String) {
        warn!(
            origin = %self.origin,
            event_type = %event.event_type(),
            %severity,
            "listener failed: {}",
            message
        );
        let _ = self.tap.publish_error(ErrorEvent {
            error_type: "ListenerFailed".to_string(),
            message,
            severity,
            origin: self.origin,
            event_type: event.event_type().clone(),
            occurred_at: Utc::now(),
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("origin", &self.origin)
            .field("event_types", &self.listeners.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(OriginId::new(), 16)
    }

    fn recorder() -> (Listener, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = Listener::infallible(move |event| {
            sink.lock().unwrap().push(event.event_type().to_string());
        });
        (listener, seen)
    }

    #[test]
    fn test_register_is_idempotent() {
        let dispatcher = dispatcher();
        let (listener, seen) = recorder();
        dispatcher.register("FetchOK", &listener, None);
        dispatcher.register("fetchok", &listener, None);
        assert_eq!(dispatcher.listener_count(&EventType::from("FetchOK")), 1);

        let event = Event::new("FetchOK", dispatcher.origin());
        assert!(dispatcher.dispatch(&event));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_scope_distinguishes_entries() {
        let dispatcher = dispatcher();
        let (listener, seen) = recorder();
        let scope = ListenerScope::new();
        dispatcher.register("FetchOK", &listener, None);
        dispatcher.register("FetchOK", &listener, Some(scope));
        assert_eq!(dispatcher.listener_count(&EventType::from("FetchOK")), 2);

        dispatcher.dispatch(&Event::new("FetchOK", dispatcher.origin()));
        assert_eq!(seen.lock().unwrap().len(), 2);

        dispatcher.unregister("FetchOK", &listener, Some(scope));
        assert_eq!(dispatcher.listener_count(&EventType::from("FetchOK")), 1);
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let dispatcher = dispatcher();
        let (listener, _) = recorder();
        dispatcher.unregister("FetchOK", &listener, None);
        assert!(!dispatcher.has_listener(&EventType::from("FetchOK")));

        dispatcher.register("FetchOK", &listener, None);
        let (other, _) = recorder();
        dispatcher.unregister("FetchOK", &other, None);
        assert!(dispatcher.has_listener(&EventType::from("FetchOK")));

        dispatcher.unregister("FetchOK", &listener, None);
        assert!(!dispatcher.has_listener(&EventType::from("FetchOK")));
    }

    #[test]
    fn test_dispatch_without_listeners() {
        let dispatcher = dispatcher();
        let (listener, seen) = recorder();
        dispatcher.register("Other", &listener, None);
        assert!(!dispatcher.dispatch(&Event::new("FetchOK", dispatcher.origin())));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_malformed_event() {
        let dispatcher = dispatcher();
        let (listener, seen) = recorder();
        dispatcher.register("", &listener, None);
        assert!(!dispatcher.dispatch(&Event::new("", dispatcher.origin())));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_register_ignores_empty_type() {
        let dispatcher = dispatcher();
        let (listener, _) = recorder();
        dispatcher.register("", &listener, None);
        dispatcher.register("   ", &listener, Some(ListenerScope::new()));
        assert!(!dispatcher.has_listener(&EventType::from("")));
        assert!(!dispatcher.has_listener(&EventType::from("   ")));
        assert_eq!(dispatcher.listener_count(&EventType::from("")), 0);
    }

    #[test]
    fn test_unregister_all() {
        let dispatcher = dispatcher();
        let (listener, _) = recorder();
        dispatcher.register("A", &listener, None);
        dispatcher.register("B", &listener, None);
        dispatcher.unregister_all();
        assert!(!dispatcher.has_listener(&EventType::from("A")));
        assert!(!dispatcher.has_listener(&EventType::from("B")));
    }

    #[test]
    fn test_registration_order() {
        let dispatcher = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            let listener = Listener::infallible(move |_| order.lock().unwrap().push(name));
            dispatcher.register("FetchOK", &listener, None);
        }
        dispatcher.dispatch(&Event::new("FetchOK", dispatcher.origin()));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_pass() {
        let dispatcher = dispatcher();
        let failing = Listener::new(|_| Err(ListenerError::new("rejected")));
        let panicking = Listener::infallible(|_| panic!("listener exploded"));
        let (listener, seen) = recorder();
        dispatcher.register("FetchOK", &failing, None);
        dispatcher.register("FetchOK", &panicking, None);
        dispatcher.register("FetchOK", &listener, None);

        assert!(dispatcher.dispatch(&Event::new("FetchOK", dispatcher.origin())));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_reported_on_error_channel() {
        let dispatcher = dispatcher();
        let (_, mut errors) = dispatcher.subscribe();
        let panicking = Listener::infallible(|_| panic!("listener exploded"));
        dispatcher.register("FetchOK", &panicking, None);

        dispatcher.dispatch(&Event::new("FetchOK", dispatcher.origin()));

        let error = errors.recv().await.unwrap();
        assert_eq!(error.severity, ErrorSeverity::Error);
        assert_eq!(error.message, "listener exploded");
        assert_eq!(error.event_type, EventType::from("FetchOK"));
        assert_eq!(error.origin, dispatcher.origin());
    }

    #[tokio::test]
    async fn test_dispatched_events_reach_tap() {
        let dispatcher = dispatcher();
        let (mut events, _) = dispatcher.subscribe();
        let (listener, _) = recorder();
        dispatcher.register("FetchOK", &listener, None);

        // not dispatched: no listener
        dispatcher.dispatch(&Event::new("Ignored", dispatcher.origin()));
        dispatcher.dispatch(&Event::new("FetchOK", dispatcher.origin()));

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type(), &EventType::from("FetchOK"));
    }
}
