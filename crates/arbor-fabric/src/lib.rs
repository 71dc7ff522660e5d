//! Event bus for Arbor repositories.
//!
//! Repository lifecycle transitions, commits, rollbacks and sequencing
//! outcomes are published as [`RepositoryEvent`]s. Subscribers receive them
//! over broadcast channels; registered [`RepositoryObserver`]s are driven by
//! a dispatcher task that drains one such channel, so observers never run on
//! the thread that emitted the event.

pub mod bus;
pub mod error;
pub mod event;
pub mod observer;

pub use bus::{EventBus, EventFilter, EventStream};
pub use error::{FabricError, FabricResult};
pub use event::{EventKind, EventPayload, RepositoryEvent};
pub use observer::{EventLatch, ObserverId, RepositoryObserver};
