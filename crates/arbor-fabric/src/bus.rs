use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{FabricError, FabricResult};
use crate::event::{EventKind, EventPayload, RepositoryEvent};
use crate::observer::{ObserverId, RepositoryObserver};

/// Filter for subscribing to a subset of events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<EventKind>>,
    /// If set, only events emitted after this instant are delivered.
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kinds: Some(vec![kind]),
            ..Self::default()
        }
    }

    /// Returns `true` if the given event matches this filter.
    pub fn matches(&self, event: &RepositoryEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(ref since) = self.since {
            if event.timestamp <= *since {
                return false;
            }
        }
        true
    }
}

/// A broadcast channel receiver for events.
pub type EventStream = broadcast::Receiver<RepositoryEvent>;

struct Subscriber {
    filter: EventFilter,
    sender: broadcast::Sender<RepositoryEvent>,
}

/// Fan-out router that delivers events to matching subscribers.
struct EventRouter {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventRouter {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, filter: EventFilter, capacity: usize) -> EventStream {
        let (tx, rx) = broadcast::channel(capacity);
        self.subscribers
            .write()
            .expect("router lock poisoned")
            .push(Subscriber { filter, sender: tx });
        rx
    }

    /// Route an event to all matching subscribers, pruning closed channels.
    fn route(&self, event: &RepositoryEvent) {
        let mut subs = self.subscribers.write().expect("router lock poisoned");
        subs.retain(|sub| {
            if sub.filter.matches(event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("router lock poisoned").len()
    }

    fn clear(&self) {
        self.subscribers.write().expect("router lock poisoned").clear();
    }
}

struct Registration {
    id: ObserverId,
    kind: Option<EventKind>,
    observer: Arc<dyn RepositoryObserver>,
}

#[derive(Default)]
struct ObserverRegistry {
    entries: RwLock<Vec<Registration>>,
}

impl ObserverRegistry {
    fn matching(&self, kind: EventKind) -> Vec<(ObserverId, Arc<dyn RepositoryObserver>)> {
        self.entries
            .read()
            .expect("observer lock poisoned")
            .iter()
            .filter(|r| r.kind.map_or(true, |k| k == kind))
            .map(|r| (r.id, Arc::clone(&r.observer)))
            .collect()
    }

    /// Deliver to every matching observer. A panicking observer is logged and
    /// does not prevent delivery to the others.
    fn deliver(&self, event: &RepositoryEvent) {
        for (id, observer) in self.matching(event.kind) {
            let result = catch_unwind(AssertUnwindSafe(|| observer.event_occurred(event)));
            if result.is_err() {
                error!(observer = %id, kind = %event.kind, "observer panicked while handling event");
            }
        }
    }
}

/// Repository event bus.
///
/// Emission is synchronous and never blocks: events are stamped with a
/// sequence number and pushed into the broadcast channel of every matching
/// subscriber. Observers are invoked by a dispatcher task started with
/// [`EventBus::start_dispatcher`].
pub struct EventBus {
    router: EventRouter,
    observers: Arc<ObserverRegistry>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    next_observer: AtomicU64,
    capacity: usize,
}

impl EventBus {
    /// Create a bus whose subscriber channels hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            router: EventRouter::new(),
            observers: Arc::new(ObserverRegistry::default()),
            dispatcher: Mutex::new(None),
            next_id: AtomicU64::new(1),
            next_observer: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Emit an event to all matching subscribers.
    pub fn emit(&self, kind: EventKind, payload: EventPayload) -> RepositoryEvent {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let event = RepositoryEvent::new(id, kind, payload);
        self.router.route(&event);
        debug!(id, kind = %kind, "event emitted");
        event
    }

    /// Subscribe to events matching the given filter.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.router.subscribe(filter, self.capacity)
    }

    pub fn subscriber_count(&self) -> usize {
        self.router.subscriber_count()
    }

    /// Register an observer for one kind, or every kind when `kind` is `None`.
    pub fn add_observer(
        &self,
        kind: Option<EventKind>,
        observer: Arc<dyn RepositoryObserver>,
    ) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .entries
            .write()
            .expect("observer lock poisoned")
            .push(Registration { id, kind, observer });
        debug!(observer = %id, ?kind, "observer added");
        id
    }

    /// Unregister an observer. Returns `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut entries = self.observers.entries.write().expect("observer lock poisoned");
        let before = entries.len();
        entries.retain(|r| r.id != id);
        entries.len() != before
    }

    /// Spawn the task that drains events into registered observers.
    pub fn start_dispatcher(&self, handle: &Handle) -> FabricResult<()> {
        let mut slot = self.dispatcher.lock().expect("dispatcher lock poisoned");
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(FabricError::AlreadyStarted);
        }

        let mut stream = self.subscribe(EventFilter::default());
        let observers = Arc::clone(&self.observers);
        *slot = Some(handle.spawn(async move {
            loop {
                match stream.recv().await {
                    Ok(event) => observers.deliver(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "observer dispatcher lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("observer dispatcher stopped");
        }));
        Ok(())
    }

    /// Close every subscriber channel. The dispatcher drains what is already
    /// queued and then exits.
    pub fn close(&self) {
        self.router.clear();
    }

    /// Take the dispatcher task handle, if one was started. Awaiting it
    /// after [`EventBus::close`] waits for queued events to be delivered.
    pub fn take_dispatcher(&self) -> FabricResult<JoinHandle<()>> {
        self.dispatcher
            .lock()
            .expect("dispatcher lock poisoned")
            .take()
            .ok_or(FabricError::Shutdown)
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.dispatcher.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}
