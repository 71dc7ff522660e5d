use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::event::{EventKind, RepositoryEvent};

/// Handle returned when registering an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Receives repository events from the dispatcher task.
///
/// Observers run on a runtime worker thread, never on the thread that
/// emitted the event.
pub trait RepositoryObserver: Send + Sync {
    fn event_occurred(&self, event: &RepositoryEvent);
}

struct LatchState {
    remaining: usize,
    received: Vec<RepositoryEvent>,
}

/// Observer that lets a caller block until `count` events of a kind arrive.
pub struct EventLatch {
    kind: EventKind,
    state: Mutex<LatchState>,
    ready: Condvar,
}

impl EventLatch {
    pub fn new(kind: EventKind, count: usize) -> Self {
        Self {
            kind,
            state: Mutex::new(LatchState {
                remaining: count,
                received: Vec::new(),
            }),
            ready: Condvar::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Block until the latch opens. Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("latch lock poisoned");
        while state.remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .expect("latch lock poisoned");
            state = next;
        }
        true
    }

    /// Events counted so far.
    pub fn received(&self) -> Vec<RepositoryEvent> {
        self.state.lock().expect("latch lock poisoned").received.clone()
    }
}

impl RepositoryObserver for EventLatch {
    fn event_occurred(&self, event: &RepositoryEvent) {
        if event.kind != self.kind {
            return;
        }
        let mut state = self.state.lock().expect("latch lock poisoned");
        if state.remaining > 0 {
            state.remaining -= 1;
            state.received.push(event.clone());
            if state.remaining == 0 {
                self.ready.notify_all();
            }
        }
    }
}
