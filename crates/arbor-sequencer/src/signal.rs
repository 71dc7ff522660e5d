use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use arbor_types::CommitId;

use crate::error::SequencingError;
use crate::task::TaskReport;

/// What a settled commit reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencingReport {
    pub commit: CommitId,
    pub tasks: Vec<TaskReport>,
}

impl SequencingReport {
    pub fn derived(&self) -> usize {
        self.tasks.iter().map(|t| t.derived).sum()
    }
}

/// Final sequencing result of one commit. A failure names the first failed
/// task; the others are logged and published as events.
pub type SequencingOutcome = Result<SequencingReport, SequencingError>;

struct SignalInner {
    commit: CommitId,
    outcome: Mutex<Option<SequencingOutcome>>,
    settled: Condvar,
    notify: Notify,
}

/// Completion promise for one commit's sequencing.
///
/// Settled exactly once, when the commit's outstanding task count reaches
/// zero. Synchronous callers block with [`CommitSignal::wait_timeout`];
/// asynchronous continuations await [`CommitSignal::settled`].
#[derive(Clone)]
pub struct CommitSignal {
    inner: Arc<SignalInner>,
}

impl CommitSignal {
    pub(crate) fn pending(commit: CommitId) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                commit,
                outcome: Mutex::new(None),
                settled: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// A signal that is already settled.
    pub fn ready(commit: CommitId, outcome: SequencingOutcome) -> Self {
        let signal = Self::pending(commit);
        signal.settle(outcome);
        signal
    }

    pub fn commit(&self) -> CommitId {
        self.inner.commit
    }

    pub fn is_settled(&self) -> bool {
        self.inner.outcome.lock().expect("signal lock poisoned").is_some()
    }

    /// The outcome, if settled.
    pub fn outcome(&self) -> Option<SequencingOutcome> {
        self.inner.outcome.lock().expect("signal lock poisoned").clone()
    }

    /// Block the calling thread until settled. Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SequencingOutcome> {
        let guard = self.inner.outcome.lock().expect("signal lock poisoned");
        let (guard, _) = self
            .inner
            .settled
            .wait_timeout_while(guard, timeout, |outcome| outcome.is_none())
            .expect("signal lock poisoned");
        guard.clone()
    }

    /// Wait asynchronously until settled.
    pub async fn settled(&self) -> SequencingOutcome {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Settle the signal. Later calls are ignored.
    pub(crate) fn settle(&self, outcome: SequencingOutcome) -> bool {
        {
            let mut slot = self.inner.outcome.lock().expect("signal lock poisoned");
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.inner.settled.notify_all();
        self.inner.notify.notify_waiters();
        true
    }
}

impl std::fmt::Debug for CommitSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitSignal")
            .field("commit", &self.inner.commit)
            .field("settled", &self.is_settled())
            .finish()
    }
}
