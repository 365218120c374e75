use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

/// Anything that can be routed by name.
pub trait Named {
    fn name(&self) -> &str;
}

/// A subscriber invoked with the event and the dispatch context.
pub trait Handler<E, C>: Send + Sync {
    fn handle(&self, event: &E, ctx: &C) -> anyhow::Result<()>;
}

impl<E, C, F> Handler<E, C> for F
where
    F: Fn(&E, &C) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &E, ctx: &C) -> anyhow::Result<()> {
        self(event, ctx)
    }
}

/// Opaque registration handle returned by [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "h{}", self.0)
    }
}

struct Registration<E, C> {
    id: HandlerId,
    handler: Arc<dyn Handler<E, C>>,
}

impl<E, C> Clone for Registration<E, C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

#[derive(Debug)]
pub struct HandlerFailure {
    pub handler: HandlerId,
    pub error: anyhow::Error,
}

/// Outcome of one [`EventBus::emit`] call.
#[derive(Debug, Default)]
pub struct EmitReport {
    pub invoked: usize,
    pub failures: Vec<HandlerFailure>,
}

impl EmitReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when no handler was registered for the event.
    pub fn unrouted(&self) -> bool {
        self.invoked == 0
    }
}

/// Named-event registry with ordered, synchronous fan-out.
///
/// Handlers for a name run in registration order with the same event and
/// context. A failing handler is logged and recorded in the [`EmitReport`];
/// the remaining handlers still run. The listener table is not locked while
/// handlers execute, so a handler may emit, subscribe or unsubscribe; a
/// handler registered mid-emit is first invoked by the next emit.
pub struct EventBus<E, C> {
    listeners: RwLock<HashMap<String, Vec<Registration<E, C>>>>,
    next_id: AtomicU64,
}

impl<E, C> Default for EventBus<E, C> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E, C> EventBus<E, C>
where
    E: Named + 'static,
    C: 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, name: &str, handler: F) -> HandlerId
    where
        F: Fn(&E, &C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_handler(name, Arc::new(handler))
    }

    pub fn on_handler(&self, name: &str, handler: Arc<dyn Handler<E, C>>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(name.to_string())
            .or_default()
            .push(Registration { id, handler });
        trace!(event = name, handler = %id, "handler registered");
        id
    }

    /// Removes one registration. Returns false when the handle is unknown.
    pub fn off(&self, name: &str, id: HandlerId) -> bool {
        let mut map = self.listeners.write();
        let Some(regs) = map.get_mut(name) else {
            return false;
        };
        let before = regs.len();
        regs.retain(|r| r.id != id);
        let removed = regs.len() != before;
        if regs.is_empty() {
            map.remove(name);
        }
        removed
    }

    pub fn emit(&self, event: &E, ctx: &C) -> EmitReport {
        let name = event.name();
        let snapshot = match self.listeners.read().get(name) {
            Some(regs) => regs.clone(),
            None => {
                trace!(event = name, "no handlers registered; dropping event");
                return EmitReport::default();
            }
        };
        let mut report = EmitReport::default();
        for reg in snapshot {
            report.invoked += 1;
            if let Err(error) = reg.handler.handle(event, ctx) {
                warn!(event = name, handler = %reg.id, error = %error, "event handler failed");
                report.failures.push(HandlerFailure {
                    handler: reg.id,
                    error,
                });
            }
        }
        report
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    /// Drops every registration. Meant for test isolation.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}
