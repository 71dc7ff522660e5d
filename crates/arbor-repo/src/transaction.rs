use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use arbor_sequencer::{CommitSignal, SequencingReport};
use arbor_store::{ChangeOp, NodeRecord, NodeSource, NodeStore, Overlay};
use arbor_types::{CommitId, NodeId};

use crate::error::{RepoError, RepoResult};

/// Lifecycle state of a [`UnitOfWork`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    /// Nothing buffered yet.
    NotStarted,
    Running,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
        })
    }
}

/// Receives the result of an asynchronous commit.
///
/// Called on a runtime worker thread once every sequencing task triggered by
/// the commit has finished, never on the thread that called commit.
pub trait CommitListener: Send + Sync {
    fn respond(&self, outcome: &CommitOutcome);
    fn error_occurred(&self, error: &RepoError);
}

/// What a finished commit or rollback reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    pub tx: String,
    pub user: String,
    pub state: TxState,
    /// Present when changes were persisted.
    pub commit: Option<CommitId>,
    /// Store sequence number of the persisted change set.
    pub seq: Option<u64>,
    /// Number of buffered operations committed or discarded.
    pub changes: usize,
    pub sequencing: Option<SequencingReport>,
}

/// Completion promise of a commit.
///
/// Synchronous commits hand back a handle that is already settled.
#[derive(Clone, Debug)]
pub struct CommitHandle {
    outcome: CommitOutcome,
    signal: Option<CommitSignal>,
    failure: Option<RepoError>,
}

impl CommitHandle {
    pub(crate) fn settled(outcome: CommitOutcome) -> Self {
        Self {
            outcome,
            signal: None,
            failure: None,
        }
    }

    pub(crate) fn pending(outcome: CommitOutcome, signal: CommitSignal) -> Self {
        Self {
            outcome,
            signal: Some(signal),
            failure: None,
        }
    }

    pub(crate) fn failed(outcome: CommitOutcome, failure: RepoError) -> Self {
        Self {
            outcome,
            signal: None,
            failure: Some(failure),
        }
    }

    pub fn tx(&self) -> &str {
        &self.outcome.tx
    }

    pub fn state(&self) -> TxState {
        self.outcome.state
    }

    pub fn commit(&self) -> Option<CommitId> {
        self.outcome.commit
    }

    pub fn is_settled(&self) -> bool {
        self.signal.as_ref().map_or(true, CommitSignal::is_settled)
    }

    /// The final result, if settled.
    pub fn result(&self) -> Option<RepoResult<CommitOutcome>> {
        if let Some(failure) = &self.failure {
            return Some(Err(failure.clone()));
        }
        match &self.signal {
            None => Some(Ok(self.outcome.clone())),
            Some(signal) => signal.outcome().map(|o| self.complete(o)),
        }
    }

    /// Block until settled or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> RepoResult<CommitOutcome> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        match &self.signal {
            None => Ok(self.outcome.clone()),
            Some(signal) => match signal.wait_timeout(timeout) {
                Some(outcome) => self.complete(outcome),
                None => Err(RepoError::Timeout {
                    tx: self.outcome.tx.clone(),
                    waited: timeout,
                }),
            },
        }
    }

    /// Wait asynchronously until settled.
    pub async fn settled_result(&self) -> RepoResult<CommitOutcome> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        match &self.signal {
            None => Ok(self.outcome.clone()),
            Some(signal) => {
                let outcome = signal.settled().await;
                self.complete(outcome)
            }
        }
    }

    fn complete(&self, outcome: arbor_sequencer::SequencingOutcome) -> RepoResult<CommitOutcome> {
        let report = outcome?;
        Ok(CommitOutcome {
            sequencing: Some(report),
            ..self.outcome.clone()
        })
    }
}

/// Read access to a transaction's view: its own buffered changes layered
/// over the committed tree.
pub(crate) struct View<'a> {
    overlay: &'a Overlay,
    base: &'a dyn NodeStore,
}

impl<'a> View<'a> {
    pub(crate) fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.overlay.node(self.base, id)
    }

    pub(crate) fn get_path(&self, p: &str) -> Option<NodeRecord> {
        self.overlay
            .lookup(self.base, p)
            .and_then(|id| self.node(&id))
    }

    pub(crate) fn require_path(&self, p: &str) -> RepoResult<NodeRecord> {
        self.get_path(p)
            .ok_or_else(|| RepoError::NotFound(p.to_string()))
    }

    pub(crate) fn children(&self, id: &NodeId) -> Vec<NodeRecord> {
        self.overlay.children(self.base, id)
    }
}

/// Mutations staged by one API call. Either all of them reach the
/// transaction's buffer or none do.
pub(crate) struct Staging<'a> {
    overlay: Overlay,
    ops: Vec<ChangeOp>,
    base: &'a dyn NodeStore,
}

impl Staging<'_> {
    pub(crate) fn view(&self) -> View<'_> {
        View {
            overlay: &self.overlay,
            base: self.base,
        }
    }

    pub(crate) fn apply(&mut self, op: ChangeOp) -> RepoResult<()> {
        self.overlay.apply(self.base, &op)?;
        self.ops.push(op);
        Ok(())
    }

    pub(crate) fn require(&self, id: &NodeId) -> RepoResult<NodeRecord> {
        self.view()
            .node(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }
}

struct Buffer {
    state: TxState,
    overlay: Overlay,
    ops: Vec<ChangeOp>,
}

/// Work taken out of a transaction by commit.
pub(crate) enum Pending {
    /// Buffered operations to persist.
    Persist(Vec<ChangeOp>),
    /// A rollback-only transaction; its operations were discarded.
    Discarded(usize),
}

/// A unit of work: an isolated buffer of mutations committed or rolled back
/// as a whole, at most once.
pub struct UnitOfWork {
    id: u64,
    user: String,
    name: String,
    rollback_only: bool,
    listener: Option<Arc<dyn CommitListener>>,
    buffer: Mutex<Buffer>,
}

impl UnitOfWork {
    pub(crate) fn new(
        id: u64,
        user: &str,
        name: &str,
        rollback_only: bool,
        listener: Option<Arc<dyn CommitListener>>,
    ) -> Self {
        Self {
            id,
            user: user.to_string(),
            name: name.to_string(),
            rollback_only,
            listener,
            buffer: Mutex::new(Buffer {
                state: TxState::NotStarted,
                overlay: Overlay::new(),
                ops: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn listener(&self) -> Option<&Arc<dyn CommitListener>> {
        self.listener.as_ref()
    }

    pub fn state(&self) -> TxState {
        self.buffer.lock().expect("transaction lock poisoned").state
    }

    /// Returns `true` if mutations are buffered.
    pub fn has_changes(&self) -> bool {
        !self
            .buffer
            .lock()
            .expect("transaction lock poisoned")
            .ops
            .is_empty()
    }

    fn state_error(&self, state: TxState, operation: &'static str) -> RepoError {
        RepoError::State {
            tx: self.name.clone(),
            state,
            operation,
        }
    }

    pub(crate) fn ensure_open(&self, operation: &'static str) -> RepoResult<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(self.state_error(state, operation));
        }
        Ok(())
    }

    /// Read through the transaction's view.
    pub(crate) fn read<R>(
        &self,
        operation: &'static str,
        store: &dyn NodeStore,
        f: impl FnOnce(&View<'_>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        let buffer = self.buffer.lock().expect("transaction lock poisoned");
        if buffer.state.is_terminal() {
            return Err(self.state_error(buffer.state, operation));
        }
        f(&View {
            overlay: &buffer.overlay,
            base: store,
        })
    }

    /// Stage mutations for one call. On error the buffer is left unchanged.
    pub(crate) fn mutate<R>(
        &self,
        operation: &'static str,
        store: &dyn NodeStore,
        f: impl FnOnce(&mut Staging<'_>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        let mut buffer = self.buffer.lock().expect("transaction lock poisoned");
        if buffer.state.is_terminal() {
            return Err(self.state_error(buffer.state, operation));
        }

        let mut staging = Staging {
            overlay: buffer.overlay.clone(),
            ops: Vec::new(),
            base: store,
        };
        let result = f(&mut staging)?;
        if !staging.ops.is_empty() {
            debug!(tx = %self.name, operation, ops = staging.ops.len(), "mutations buffered");
            buffer.overlay = staging.overlay;
            buffer.ops.extend(staging.ops);
            buffer.state = TxState::Running;
        }
        Ok(result)
    }

    /// Take the buffered work for commit.
    pub(crate) fn begin_commit(&self) -> RepoResult<Pending> {
        let mut buffer = self.buffer.lock().expect("transaction lock poisoned");
        if buffer.state.is_terminal() {
            return Err(self.state_error(buffer.state, "commit"));
        }
        buffer.overlay = Overlay::new();
        let ops = std::mem::take(&mut buffer.ops);
        if self.rollback_only {
            buffer.state = TxState::RolledBack;
            return Ok(Pending::Discarded(ops.len()));
        }
        buffer.state = TxState::Running;
        Ok(Pending::Persist(ops))
    }

    pub(crate) fn finish(&self, state: TxState) {
        self.buffer.lock().expect("transaction lock poisoned").state = state;
    }

    /// Discard the buffer. Returns the number of discarded operations.
    pub(crate) fn discard(&self) -> RepoResult<usize> {
        let mut buffer = self.buffer.lock().expect("transaction lock poisoned");
        if buffer.state.is_terminal() {
            return Err(self.state_error(buffer.state, "roll back"));
        }
        buffer.overlay = Overlay::new();
        buffer.state = TxState::RolledBack;
        Ok(std::mem::take(&mut buffer.ops).len())
    }

    pub(crate) fn outcome(&self, state: TxState, changes: usize) -> CommitOutcome {
        CommitOutcome {
            tx: self.name.clone(),
            user: self.user.clone(),
            state,
            commit: None,
            seq: None,
            changes,
            sequencing: None,
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("name", &self.name)
            .field("rollback_only", &self.rollback_only)
            .field("state", &self.state())
            .finish()
    }
}
