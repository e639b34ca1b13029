//! In-process publish/subscribe hub.
//!
//! The hub is the one seam between the transport session and the rest of
//! the application: UI-side consumers register listeners and publish
//! events by type name, without any knowledge of the connection. The
//! transport binds itself as the outbound sink at construction, so the
//! hub has no compile-time dependency on it.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, OnceLock, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use {serde_json::Value, tracing::warn};

use uplink_protocol::Envelope;

/// Callback invoked with `(type, event)` for every delivered event.
pub type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Outbound sink bound by the transport session. The flag asks the server
/// to loop the broadcast back to the originating session.
pub type RemoteSink = Box<dyn Fn(Envelope, bool) + Send + Sync>;

struct Entry {
    id: u64,
    callback: Listener,
}

/// Publish/subscribe hub. One instance per logical session; tests may
/// create as many independent instances as they like.
#[derive(Default)]
pub struct Hub {
    listeners: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
    sink: OnceLock<RemoteSink>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` for events of type `r#type`.
    ///
    /// An empty type is a no-op and returns an inert handle. The returned
    /// [`Subscription`] removes exactly this listener when cancelled;
    /// dropping it without cancelling leaves the listener registered.
    pub fn register(
        self: &Arc<Self>,
        r#type: &str,
        callback: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> Subscription {
        if r#type.is_empty() {
            warn!("ignoring listener registration for empty event type");
            return Subscription { target: None };
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.entry(r#type.to_string()).or_default().push(Entry {
            id,
            callback: Arc::new(callback),
        });
        Subscription {
            target: Some((Arc::downgrade(self), r#type.to_string(), id)),
        }
    }

    /// Deliver an event to every currently-registered listener for its
    /// type, synchronously, in registration order. A missing payload is
    /// substituted with `{}`.
    ///
    /// Each listener runs inside its own panic boundary: a panicking
    /// listener is logged and delivery continues with the next one.
    pub fn publish_local(&self, r#type: &str, event: Option<Value>) {
        let event = event.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let snapshot: Vec<Listener> = {
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            listeners
                .get(r#type)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
                .unwrap_or_default()
        };
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(r#type, &event))).is_err() {
                warn!(event_type = r#type, "listener panicked during dispatch");
            }
        }
    }

    /// Hand an envelope to the bound transport for delivery to the server.
    pub fn publish_remote(&self, r#type: &str, event: Option<Value>) {
        self.forward(r#type, event, false);
    }

    /// Like [`Hub::publish_remote`], additionally asking the server to
    /// redeliver the broadcast to this session.
    pub fn publish_remote_echoed(&self, r#type: &str, event: Option<Value>) {
        self.forward(r#type, event, true);
    }

    fn forward(&self, r#type: &str, event: Option<Value>, echo: bool) {
        let envelope = Envelope::new(
            r#type,
            event.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        );
        match self.sink.get() {
            Some(sink) => sink(envelope, echo),
            None => warn!(
                event_type = r#type,
                "dropping remote publish: no transport bound"
            ),
        }
    }

    /// One-time wiring call made by the transport session. A second bind
    /// is rejected; the first sink stays in place.
    pub fn bind_transport(&self, sink: RemoteSink) {
        if self.sink.set(sink).is_err() {
            warn!("transport already bound; ignoring second bind");
        }
    }
}

/// Deregistration handle returned by [`Hub::register`].
pub struct Subscription {
    target: Option<(Weak<Hub>, String, u64)>,
}

impl Subscription {
    /// Remove exactly the listener this handle was returned for.
    /// Idempotent; never affects other listeners.
    pub fn cancel(&self) {
        let Some((hub, r#type, id)) = &self.target else {
            return;
        };
        let Some(hub) = hub.upgrade() else { return };
        let mut listeners = hub
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = listeners.get_mut(r#type) {
            entries.retain(|e| e.id != *id);
            if entries.is_empty() {
                listeners.remove(r#type);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<(String, Value)>>>, impl Fn(&str, &Value) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |t: &str, e: &Value| {
                seen.lock().unwrap().push((t.to_string(), e.clone()));
            }
        };
        (seen, sink)
    }

    #[test]
    fn basic_publish_delivers_once() {
        let hub = Hub::new();
        let (seen, sink) = recorder();
        let _sub = hub.register("foo", sink);

        hub.publish_local("foo", Some(serde_json::json!({"x": 1})));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "foo");
        assert_eq!(seen[0].1, serde_json::json!({"x": 1}));
    }

    #[test]
    fn missing_payload_becomes_empty_object() {
        let hub = Hub::new();
        let (seen, sink) = recorder();
        let _sub = hub.register("bar", sink);

        hub.publish_local("bar", None);

        assert_eq!(seen.lock().unwrap()[0].1, serde_json::json!({}));
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let hub = Hub::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                hub.register("seq", move |_, _| order.lock().unwrap().push(i))
            })
            .collect();

        hub.publish_local("seq", None);

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        drop(subs);
    }

    #[test]
    fn cancel_removes_only_that_listener() {
        let hub = Hub::new();
        let (seen_a, sink_a) = recorder();
        let (seen_b, sink_b) = recorder();
        let (seen_other, sink_other) = recorder();
        let sub_a = hub.register("t", sink_a);
        let _sub_b = hub.register("t", sink_b);
        let _sub_other = hub.register("u", sink_other);

        sub_a.cancel();
        hub.publish_local("t", None);
        hub.publish_local("u", None);

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert_eq!(seen_other.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancel_is_idempotent() {
        let hub = Hub::new();
        let (seen, sink) = recorder();
        let sub = hub.register("t", sink);

        sub.cancel();
        sub.cancel();
        hub.publish_local("t", None);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_subscription_keeps_listener() {
        let hub = Hub::new();
        let (seen, sink) = recorder();
        drop(hub.register("t", sink));

        hub.publish_local("t", None);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_type_registration_is_inert() {
        let hub = Hub::new();
        let (seen, sink) = recorder();
        let sub = hub.register("", sink);

        sub.cancel();
        hub.publish_local("", None);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_block_later_ones() {
        let hub = Hub::new();
        let (seen, sink) = recorder();
        let _bad = hub.register("t", |_, _| panic!("misbehaving consumer"));
        let _good = hub.register("t", sink);

        hub.publish_local("t", None);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn remote_publish_goes_through_bound_sink() {
        let hub = Hub::new();
        let sent = Arc::new(Mutex::new(Vec::new()));
        {
            let sent = Arc::clone(&sent);
            hub.bind_transport(Box::new(move |envelope, echo| {
                sent.lock().unwrap().push((envelope, echo));
            }));
        }

        hub.publish_remote("a", Some(serde_json::json!({"k": "v"})));
        hub.publish_remote_echoed("b", None);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0.r#type, "a");
        assert!(!sent[0].1);
        assert_eq!(sent[1].0.r#type, "b");
        assert_eq!(sent[1].0.event, serde_json::json!({}));
        assert!(sent[1].1);
    }

    #[test]
    fn second_bind_keeps_first_sink() {
        let hub = Hub::new();
        let (first, second) = (Arc::new(Mutex::new(0)), Arc::new(Mutex::new(0)));
        {
            let first = Arc::clone(&first);
            hub.bind_transport(Box::new(move |_, _| *first.lock().unwrap() += 1));
        }
        {
            let second = Arc::clone(&second);
            hub.bind_transport(Box::new(move |_, _| *second.lock().unwrap() += 1));
        }

        hub.publish_remote("t", None);

        assert_eq!(*first.lock().unwrap(), 1);
        assert_eq!(*second.lock().unwrap(), 0);
    }

    #[test]
    fn local_publish_never_reaches_sink() {
        let hub = Hub::new();
        let sent = Arc::new(Mutex::new(0));
        {
            let sent = Arc::clone(&sent);
            hub.bind_transport(Box::new(move |_, _| *sent.lock().unwrap() += 1));
        }

        hub.publish_local("t", None);

        assert_eq!(*sent.lock().unwrap(), 0);
    }
}
