#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use arbor_repo::{
    CommitListener, CommitOutcome, DerivedNode, RepoError, Repository, RepositoryConfig,
    Sequencer, SequencerOutput, SequencingInput, SequencingResult, TriggerRule,
};

pub const WAIT: Duration = Duration::from_secs(10);

pub const GATED_TYPE: &str = "test:gated";
pub const GATED_INPUT: &str = "test:input";

pub fn open() -> Repository {
    Repository::open(RepositoryConfig::in_memory()).unwrap()
}

/// What a listener was told.
#[derive(Clone, Debug)]
pub enum Received {
    Outcome(CommitOutcome),
    Error(RepoError),
}

/// Listener that records every call, plus whether the gated sequencer had
/// finished at the moment of the call.
#[derive(Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<(Received, bool)>>,
    ready: Condvar,
    finished: Option<Arc<AtomicBool>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn watching(finished: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            finished: Some(finished),
            ..Self::default()
        })
    }

    fn record(&self, received: Received) {
        let finished = self
            .finished
            .as_ref()
            .map_or(true, |f| f.load(Ordering::SeqCst));
        self.calls.lock().unwrap().push((received, finished));
        self.ready.notify_all();
    }

    /// Wait for the first call.
    pub fn wait(&self, timeout: Duration) -> Option<(Received, bool)> {
        let calls = self.calls.lock().unwrap();
        let (calls, _) = self
            .ready
            .wait_timeout_while(calls, timeout, |c| c.is_empty())
            .unwrap();
        calls.first().cloned()
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CommitListener for RecordingListener {
    fn respond(&self, outcome: &CommitOutcome) {
        self.record(Received::Outcome(outcome.clone()));
    }

    fn error_occurred(&self, error: &RepoError) {
        self.record(Received::Error(error.clone()));
    }
}

/// Sequencer that holds its task open until the gate is released.
pub struct Gated {
    pub gate: Arc<Notify>,
    pub finished: Arc<AtomicBool>,
}

impl Gated {
    pub fn register(repo: &Repository) -> (Arc<Notify>, Arc<AtomicBool>) {
        let gate = Arc::new(Notify::new());
        let finished = Arc::new(AtomicBool::new(false));
        repo.register_sequencer(
            TriggerRule::new(GATED_TYPE, GATED_INPUT),
            Arc::new(Gated {
                gate: Arc::clone(&gate),
                finished: Arc::clone(&finished),
            }),
        );
        (gate, finished)
    }
}

#[async_trait]
impl Sequencer for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    async fn execute(&self, _input: &SequencingInput) -> SequencingResult<SequencerOutput> {
        self.gate.notified().await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(SequencerOutput {
            nodes: vec![DerivedNode::new("derived", "test:derived")],
        })
    }
}
