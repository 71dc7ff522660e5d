//! Repository lifecycle.
//!
//! The reachable/not-reachable state is owned by a single actor task and
//! changes only in response to [`ClientEvent`]s sent over its command
//! channel. Completed transitions are published on the event bus, where
//! observers (for example an [`arbor_fabric::EventLatch`]) pick them up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};

use arbor_fabric::{EventBus, EventKind, EventPayload};
use arbor_sequencer::SequencingCoordinator;
use arbor_store::{ChangeOp, ChangeSet, NodeSource, NodeStore};
use arbor_types::lexicon::{self, SYSTEM_USER};
use arbor_types::{path, NodeId};

use crate::error::{RepoError, RepoResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryState {
    NotReachable,
    Reachable,
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotReachable => "NOT_REACHABLE",
            Self::Reachable => "REACHABLE",
        })
    }
}

/// Requests that drive lifecycle transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    Started,
    ShuttingDown,
}

type Reply = oneshot::Sender<RepoResult<RepositoryState>>;

struct Command {
    event: ClientEvent,
    reply: Option<Reply>,
}

/// What the actor needs to carry out transitions.
pub(crate) struct LifecycleContext {
    pub(crate) store: Arc<dyn NodeStore>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) sequencing: SequencingCoordinator,
    pub(crate) storage: String,
}

pub(crate) struct Lifecycle {
    state: watch::Receiver<RepositoryState>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Lifecycle {
    pub(crate) fn spawn(handle: &Handle, ctx: LifecycleContext) -> Self {
        let (state_tx, state_rx) = watch::channel(RepositoryState::NotReachable);
        let (commands, mut rx) = mpsc::unbounded_channel::<Command>();
        handle.spawn(async move {
            while let Some(Command { event, reply }) = rx.recv().await {
                let result = ctx.transition(&state_tx, event).await;
                if let Err(e) = &result {
                    error!(?event, error = %e, "lifecycle transition failed");
                    ctx.bus.emit(
                        EventKind::Error,
                        EventPayload::Error {
                            message: e.to_string(),
                        },
                    );
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            debug!("lifecycle actor stopped");
        });
        Self {
            state: state_rx,
            commands,
        }
    }

    pub(crate) fn state(&self) -> RepositoryState {
        *self.state.borrow()
    }

    /// Queue a transition without waiting for it.
    pub(crate) fn send(&self, event: ClientEvent) -> RepoResult<()> {
        self.commands
            .send(Command { event, reply: None })
            .map_err(|_| RepoError::NotReachable)
    }

    /// Queue a transition and return a receiver for its result.
    pub(crate) fn request(
        &self,
        event: ClientEvent,
    ) -> RepoResult<oneshot::Receiver<RepoResult<RepositoryState>>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command {
                event,
                reply: Some(reply),
            })
            .map_err(|_| RepoError::NotReachable)?;
        Ok(rx)
    }
}

impl LifecycleContext {
    async fn transition(
        &self,
        state: &watch::Sender<RepositoryState>,
        event: ClientEvent,
    ) -> RepoResult<RepositoryState> {
        let current = *state.borrow();
        match (current, event) {
            (RepositoryState::NotReachable, ClientEvent::Started) => {
                bootstrap(&*self.store)?;
                state.send_replace(RepositoryState::Reachable);
                info!(storage = %self.storage, "repository reachable");
                self.bus.emit(
                    EventKind::RepositoryStarted,
                    EventPayload::Lifecycle {
                        storage: self.storage.clone(),
                    },
                );
            }
            (RepositoryState::Reachable, ClientEvent::ShuttingDown) => {
                // New transactions are refused from here on.
                state.send_replace(RepositoryState::NotReachable);
                self.sequencing.wait_idle().await;
                self.store.checkpoint()?;
                info!(storage = %self.storage, "repository stopped");
                self.bus.emit(
                    EventKind::RepositoryStopped,
                    EventPayload::Lifecycle {
                        storage: self.storage.clone(),
                    },
                );
            }
            (current, event) => {
                debug!(%current, ?event, "lifecycle event ignored in current state");
            }
        }
        Ok(*state.borrow())
    }
}

/// Create whichever reserved roots are missing.
pub(crate) fn bootstrap(store: &dyn NodeStore) -> RepoResult<()> {
    let mut created: HashMap<&str, NodeId> = HashMap::new();
    let mut ops = Vec::new();
    for (root, primary_type) in lexicon::reserved_roots() {
        if store.lookup(root).is_some() {
            continue;
        }
        let parent_path = path::parent(root).unwrap_or(path::ROOT);
        let parent = match created.get(parent_path) {
            Some(id) => *id,
            None => store
                .lookup(parent_path)
                .ok_or_else(|| RepoError::NotFound(parent_path.to_string()))?,
        };
        let id = NodeId::new();
        ops.push(ChangeOp::AddNode {
            id,
            parent,
            name: path::name(root).to_string(),
            primary_type: primary_type.to_string(),
            provisional: true,
        });
        created.insert(root, id);
    }

    if !ops.is_empty() {
        let applied = store.apply(ChangeSet::new(SYSTEM_USER, ops))?;
        info!(roots = created.len(), seq = applied.seq, "reserved roots created");
    }
    Ok(())
}
