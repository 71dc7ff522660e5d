use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};

use arbor_fabric::{
    EventBus, EventFilter, EventKind, EventPayload, EventStream, ObserverId, RepositoryObserver,
};
use arbor_sequencer::{
    DdlSequencer, Sequencer, SequencingCoordinator, TouchedNode, TriggerRule,
};
use arbor_store::{
    AppliedCommit, ChangeSet, FileNodeStore, InMemoryNodeStore, NodeSource, NodeStore,
};
use arbor_types::path;

use crate::config::{RepositoryConfig, StorageConfig};
use crate::error::{RepoError, RepoResult};
use crate::lifecycle::{ClientEvent, Lifecycle, LifecycleContext, RepositoryState};
use crate::transaction::{
    CommitHandle, CommitListener, CommitOutcome, Pending, TxState, UnitOfWork,
};

/// Upper bound on delivering already-queued events to observers on drop.
const EVENT_DRAIN: Duration = Duration::from_secs(5);

/// A hierarchical typed node repository.
///
/// The repository owns the async runtime that runs sequencing tasks,
/// listener continuations and the lifecycle actor. Its API is synchronous
/// and must not be called from inside an async context.
pub struct Repository {
    pub(crate) config: RepositoryConfig,
    pub(crate) store: Arc<dyn NodeStore>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) sequencing: SequencingCoordinator,
    lifecycle: Lifecycle,
    runtime: Option<Runtime>,
    next_tx: AtomicU64,
}

impl Repository {
    /// Build a repository in the not-reachable state.
    pub fn new(config: RepositoryConfig) -> RepoResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.sequencer_workers.max(1))
            .thread_name("arbor-worker")
            .enable_all()
            .build()
            .map_err(|e| RepoError::Runtime(e.to_string()))?;
        let handle = runtime.handle().clone();

        let store: Arc<dyn NodeStore> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryNodeStore::new()),
            StorageConfig::File { dir } => Arc::new(FileNodeStore::open(dir, config.wal.clone())?),
        };

        let bus = Arc::new(EventBus::new(config.event_channel_capacity));
        bus.start_dispatcher(&handle)
            .map_err(|e| RepoError::Runtime(e.to_string()))?;

        let sequencing = SequencingCoordinator::new(Arc::clone(&store), Arc::clone(&bus), handle.clone());
        if config.enable_ddl_sequencer {
            sequencing.register(DdlSequencer::rule(), Arc::new(DdlSequencer));
        }

        let storage = config.storage.label();
        let lifecycle = Lifecycle::spawn(
            &handle,
            LifecycleContext {
                store: Arc::clone(&store),
                bus: Arc::clone(&bus),
                sequencing: sequencing.clone(),
                storage: storage.clone(),
            },
        );
        info!(%storage, seq = store.seq(), "repository created");

        Ok(Self {
            config,
            store,
            bus,
            sequencing,
            lifecycle,
            runtime: Some(runtime),
            next_tx: AtomicU64::new(1),
        })
    }

    /// Build a repository and wait until it is reachable.
    pub fn open(config: RepositoryConfig) -> RepoResult<Self> {
        let repo = Self::new(config)?;
        repo.start_and_wait()?;
        Ok(repo)
    }

    /// Request startup without waiting. Observers of
    /// [`EventKind::RepositoryStarted`] are told when it completes.
    pub fn start(&self) -> RepoResult<()> {
        self.lifecycle.send(ClientEvent::Started)
    }

    pub fn start_and_wait(&self) -> RepoResult<RepositoryState> {
        self.lifecycle
            .request(ClientEvent::Started)?
            .blocking_recv()
            .map_err(|_| RepoError::NotReachable)?
    }

    /// Stop accepting transactions, wait for outstanding sequencing and
    /// listener callbacks, flush durable storage and report
    /// [`EventKind::RepositoryStopped`].
    pub fn shutdown(&self) -> RepoResult<()> {
        let state = self
            .lifecycle
            .request(ClientEvent::ShuttingDown)?
            .blocking_recv()
            .map_err(|_| RepoError::NotReachable)??;
        debug!(%state, "shutdown complete");
        Ok(())
    }

    pub fn state(&self) -> RepositoryState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_durable()
    }

    /// Commit sequence number of the latest persisted change set.
    pub fn seq(&self) -> u64 {
        self.store.seq()
    }

    pub(crate) fn ensure_reachable(&self) -> RepoResult<()> {
        match self.state() {
            RepositoryState::Reachable => Ok(()),
            RepositoryState::NotReachable => Err(RepoError::NotReachable),
        }
    }

    // ---- Observers ----

    pub fn add_observer(
        &self,
        kind: Option<EventKind>,
        observer: Arc<dyn RepositoryObserver>,
    ) -> ObserverId {
        self.bus.add_observer(kind, observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.bus.remove_observer(id)
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        self.bus.subscribe(filter)
    }

    // ---- Sequencing ----

    pub fn register_sequencer(&self, rule: TriggerRule, sequencer: Arc<dyn Sequencer>) {
        self.sequencing.register(rule, sequencer);
    }

    /// Number of sequencing tasks not yet finished.
    pub fn outstanding_sequencing(&self) -> usize {
        self.sequencing.outstanding()
    }

    // ---- Maintenance ----

    /// Compact durable storage into a snapshot.
    pub fn checkpoint(&self) -> RepoResult<()> {
        self.store.checkpoint()?;
        info!(seq = self.store.seq(), "checkpoint written");
        Ok(())
    }

    // ---- Transactions ----

    /// Open a unit of work. With no listener, [`Repository::commit`] blocks
    /// until sequencing settles; with one, it returns at once and the
    /// listener is told later.
    pub fn create_transaction(
        &self,
        user: &str,
        name: &str,
        rollback_only: bool,
        listener: Option<Arc<dyn CommitListener>>,
    ) -> RepoResult<UnitOfWork> {
        self.ensure_reachable()?;
        if user.trim().is_empty() {
            return Err(RepoError::InvalidArgument("transaction user must not be empty".into()));
        }
        path::validate_name(user)
            .map_err(|e| RepoError::InvalidArgument(format!("invalid transaction user '{user}': {e}")))?;
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        debug!(tx = %name, id, user, rollback_only, listener = listener.is_some(), "transaction created");
        Ok(UnitOfWork::new(id, user, name, rollback_only, listener))
    }

    /// Persist the transaction's buffer and hand the touched nodes to
    /// sequencing.
    ///
    /// A rollback-only transaction is rolled back instead. Without a
    /// listener this blocks until sequencing settles (bounded by the
    /// configured commit timeout) and reports sequencing failure as an
    /// error. With a listener it returns once the changes are persisted.
    pub fn commit(&self, tx: &UnitOfWork) -> RepoResult<CommitHandle> {
        self.ensure_reachable()?;
        let ops = match tx.begin_commit()? {
            Pending::Discarded(changes) => {
                info!(tx = %tx.name(), changes, "rollback-only transaction rolled back on commit");
                return Ok(CommitHandle::settled(self.rolled_back(tx, changes)));
            }
            Pending::Persist(ops) => ops,
        };
        let changes = ops.len();

        let applied = if ops.is_empty() {
            None
        } else {
            match self.store.apply(ChangeSet::new(tx.user(), ops)) {
                Ok(applied) => Some(applied),
                Err(e) => return self.persist_failed(tx, changes, e.into()),
            }
        };
        tx.finish(TxState::Committed);

        let commit = applied
            .as_ref()
            .map(|a| a.change_set.commit)
            .unwrap_or_default();
        let mut outcome = tx.outcome(TxState::Committed, changes);
        outcome.commit = applied.as_ref().map(|a| a.change_set.commit);
        outcome.seq = applied.as_ref().map(|a| a.seq);
        info!(tx = %tx.name(), %commit, changes, "transaction committed");
        self.bus.emit(
            EventKind::TransactionCommitted,
            EventPayload::Transaction {
                name: tx.name().to_string(),
                user: tx.user().to_string(),
                commit: outcome.commit,
                changes,
            },
        );

        let touched = applied.as_ref().map(|a| self.touched(a)).unwrap_or_default();
        let signal = self.sequencing.submit(commit, &touched);

        match tx.listener() {
            None => match signal.wait_timeout(self.config.commit_timeout) {
                Some(Ok(report)) => {
                    outcome.sequencing = Some(report);
                    Ok(CommitHandle::settled(outcome))
                }
                Some(Err(e)) => {
                    warn!(tx = %tx.name(), %commit, error = %e, "sequencing failed after commit");
                    Err(RepoError::Sequencing(e))
                }
                None => Err(RepoError::Timeout {
                    tx: tx.name().to_string(),
                    waited: self.config.commit_timeout,
                }),
            },
            Some(listener) => {
                let handle = CommitHandle::pending(outcome, signal);
                let pending = handle.clone();
                let listener = Arc::clone(listener);
                self.sequencing.spawn_follow_up(async move {
                    match pending.settled_result().await {
                        Ok(outcome) => listener.respond(&outcome),
                        Err(e) => listener.error_occurred(&e),
                    }
                });
                Ok(handle)
            }
        }
    }

    /// Discard the transaction's buffer. Never touches storage or
    /// sequencing.
    pub fn rollback(&self, tx: &UnitOfWork) -> RepoResult<CommitOutcome> {
        let changes = tx.discard()?;
        info!(tx = %tx.name(), changes, "transaction rolled back");
        Ok(self.rolled_back(tx, changes))
    }

    fn rolled_back(&self, tx: &UnitOfWork, changes: usize) -> CommitOutcome {
        let outcome = tx.outcome(TxState::RolledBack, changes);
        self.bus.emit(
            EventKind::TransactionRolledBack,
            EventPayload::Transaction {
                name: tx.name().to_string(),
                user: tx.user().to_string(),
                commit: None,
                changes,
            },
        );
        if let Some(listener) = tx.listener() {
            let listener = Arc::clone(listener);
            let notify = outcome.clone();
            self.sequencing
                .spawn_follow_up(async move { listener.respond(&notify) });
        }
        outcome
    }

    fn persist_failed(
        &self,
        tx: &UnitOfWork,
        changes: usize,
        error: RepoError,
    ) -> RepoResult<CommitHandle> {
        tx.finish(TxState::RolledBack);
        let error = match error {
            RepoError::Store(e) => RepoError::CommitFailed {
                tx: tx.name().to_string(),
                reason: e.to_string(),
            },
            other => other,
        };
        warn!(tx = %tx.name(), error = %error, "commit could not be persisted");
        self.bus.emit(
            EventKind::Error,
            EventPayload::Error {
                message: error.to_string(),
            },
        );

        match tx.listener() {
            None => Err(error),
            Some(listener) => {
                let listener = Arc::clone(listener);
                let notify = error.clone();
                self.sequencing
                    .spawn_follow_up(async move { listener.error_occurred(&notify) });
                Ok(CommitHandle::failed(
                    tx.outcome(TxState::RolledBack, changes),
                    error,
                ))
            }
        }
    }

    /// Nodes written by a persisted change set, with the properties it set.
    fn touched(&self, applied: &AppliedCommit) -> Vec<TouchedNode> {
        let change_set = &applied.change_set;
        change_set
            .touched()
            .into_iter()
            .filter_map(|id| {
                self.store.node(&id).map(|record| TouchedNode {
                    changed: change_set.properties_set_on(&id),
                    record,
                })
            })
            .collect()
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.bus.close();
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if let Ok(dispatcher) = self.bus.take_dispatcher() {
            if Handle::try_current().is_ok() {
                warn!("repository dropped inside an async context; queued events discarded");
            } else if runtime
                .block_on(tokio::time::timeout(EVENT_DRAIN, dispatcher))
                .is_err()
            {
                warn!("event dispatcher did not drain before shutdown");
            }
        }
        runtime.shutdown_background();
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("storage", &self.config.storage)
            .field("state", &self.state())
            .field("seq", &self.store.seq())
            .finish()
    }
}
