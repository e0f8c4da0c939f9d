//! In-process event bus.
//!
//! Listeners subscribe to a named event with a typed payload. `emit` awaits
//! every listener in registration order, so a sequence of emissions for one
//! operation is observed by listeners in exactly that order. Listener errors
//! are logged and contained; they never reach the emitter.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::TallyError;

type Payload = Arc<dyn Any + Send + Sync>;
type Handler = Arc<dyn Fn(Payload) -> Option<BoxFuture<'static, Result<(), TallyError>>> + Send + Sync>;

static LISTENER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier returned by `on`, usable with `remove_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    payload_type: &'static str,
    handler: Handler,
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<String, Vec<Listener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `event`. Payloads of any other type are skipped.
    pub fn on<P, F, Fut>(&self, event: &str, handler: F) -> ListenerId
    where
        P: Any + Clone + Send + Sync,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TallyError>> + Send + 'static,
    {
        let id = ListenerId(LISTENER_COUNTER.fetch_add(1, Ordering::Relaxed));
        let erased: Handler = Arc::new(move |payload: Payload| {
            payload
                .downcast_ref::<P>()
                .map(|typed| handler(typed.clone()).boxed())
        });
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Listener {
                id,
                payload_type: type_name::<P>(),
                handler: erased,
            });
        debug!(event = %event, listener_id = id.0, "listener registered");
        id
    }

    /// Deliver `payload` to every listener of `event`. Returns how many ran.
    pub async fn emit<P>(&self, event: &str, payload: P) -> usize
    where
        P: Any + Send + Sync,
    {
        let listeners: Vec<(ListenerId, &'static str, Handler)> = {
            let guard = self.listeners.read();
            match guard.get(event) {
                Some(list) => list
                    .iter()
                    .map(|l| (l.id, l.payload_type, Arc::clone(&l.handler)))
                    .collect(),
                None => Vec::new(),
            }
        };

        let payload: Payload = Arc::new(payload);
        let mut invoked = 0usize;
        for (id, expected, handler) in listeners {
            let Some(fut) = handler(Arc::clone(&payload)) else {
                warn!(
                    event = %event,
                    listener_id = id.0,
                    expected = expected,
                    actual = type_name::<P>(),
                    "payload type mismatch; listener skipped"
                );
                continue;
            };
            invoked += 1;
            if let Err(err) = fut.await {
                warn!(
                    event = %event,
                    listener_id = id.0,
                    error = %err,
                    "event listener failed"
                );
            }
        }
        debug!(event = %event, invoked, "event emitted");
        invoked
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let mut guard = self.listeners.write();
        let Some(list) = guard.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            guard.remove(event);
        }
        removed
    }

    /// Drop every listener of `event`. Returns how many were removed.
    pub fn remove_all_listeners(&self, event: &str) -> usize {
        self.listeners
            .write()
            .remove(event)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .get(event)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Names of events with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}
