use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use arbor_fabric::{EventBus, EventKind, EventPayload};
use arbor_store::{ChangeOp, ChangeSet, NodeRecord, NodeStore};
use arbor_types::lexicon::{mixins, SYSTEM_USER};
use arbor_types::{CommitId, NodeId};

use crate::error::{SequencingError, SequencingResult};
use crate::rule::TriggerRule;
use crate::sequencer::{DerivedNode, Sequencer, SequencerOutput, SequencingInput};
use crate::signal::{CommitSignal, SequencingOutcome, SequencingReport};
use crate::task::{SequencingTask, TaskReport, TaskStatus};

/// A node written by a commit, with the properties that commit set on it.
#[derive(Clone, Debug)]
pub struct TouchedNode {
    pub record: NodeRecord,
    pub changed: Vec<String>,
}

struct Registration {
    rule: TriggerRule,
    sequencer: Arc<dyn Sequencer>,
}

/// Countdown for one commit.
struct CommitTracker {
    signal: CommitSignal,
    outstanding: AtomicUsize,
    reports: Mutex<Vec<TaskReport>>,
    failures: Mutex<Vec<SequencingError>>,
}

impl CommitTracker {
    fn new(commit: CommitId, tasks: usize) -> Self {
        Self {
            signal: CommitSignal::pending(commit),
            outstanding: AtomicUsize::new(tasks),
            reports: Mutex::new(Vec::with_capacity(tasks)),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Record one finished task. Returns the outcome when this was the last.
    fn finish(&self, report: TaskReport, failure: Option<SequencingError>) -> Option<SequencingOutcome> {
        self.reports.lock().expect("tracker lock poisoned").push(report);
        if let Some(failure) = failure {
            self.failures.lock().expect("tracker lock poisoned").push(failure);
        }
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }

        let outcome = match self.failures.lock().expect("tracker lock poisoned").first() {
            Some(failure) => Err(failure.clone()),
            None => {
                let mut tasks = self.reports.lock().expect("tracker lock poisoned").clone();
                tasks.sort_by_key(|t| t.id);
                Ok(SequencingReport {
                    commit: self.signal.commit(),
                    tasks,
                })
            }
        };
        self.signal.settle(outcome.clone());
        Some(outcome)
    }
}

struct CoordinatorInner {
    store: Arc<dyn NodeStore>,
    bus: Arc<EventBus>,
    runtime: Handle,
    registrations: RwLock<Vec<Registration>>,
    active: Mutex<HashMap<u64, Arc<SequencingTask>>>,
    next_task: AtomicU64,
    follow_ups: AtomicUsize,
    idle: Notify,
}

/// Schedules sequencing work for commits and tracks it per commit.
#[derive(Clone)]
pub struct SequencingCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SequencingCoordinator {
    /// Create a coordinator that runs tasks on `runtime` and writes derived
    /// output into `store`.
    pub fn new(store: Arc<dyn NodeStore>, bus: Arc<EventBus>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                bus,
                runtime,
                registrations: RwLock::new(Vec::new()),
                active: Mutex::new(HashMap::new()),
                next_task: AtomicU64::new(1),
                follow_ups: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Register a sequencer under a trigger rule.
    pub fn register(&self, rule: TriggerRule, sequencer: Arc<dyn Sequencer>) {
        info!(rule = %rule, sequencer = sequencer.name(), "sequencer registered");
        self.inner
            .registrations
            .write()
            .expect("registration lock poisoned")
            .push(Registration { rule, sequencer });
    }

    /// Number of tasks not yet finished, across all commits.
    pub fn outstanding(&self) -> usize {
        self.inner.active.lock().expect("task lock poisoned").len()
    }

    /// Run `work` on the coordinator's runtime and count it as outstanding
    /// until it completes, so [`wait_idle`](Self::wait_idle) covers it.
    pub fn spawn_follow_up<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.follow_ups.fetch_add(1, Ordering::AcqRel);
        let guard = FollowUpGuard(Arc::clone(&self.inner));
        self.inner.runtime.spawn(async move {
            let _guard = guard;
            work.await;
        });
    }

    /// Schedule every task `touched` triggers for `commit`.
    ///
    /// The returned signal settles once all of them have finished; with no
    /// matching rule it is settled already.
    pub fn submit(&self, commit: CommitId, touched: &[TouchedNode]) -> CommitSignal {
        let planned: Vec<(Arc<dyn Sequencer>, SequencingInput)> = {
            let registrations = self
                .inner
                .registrations
                .read()
                .expect("registration lock poisoned");
            touched
                .iter()
                .flat_map(|t| {
                    registrations.iter().filter_map(move |r| {
                        r.rule.matches(&t.record, &t.changed).map(|property| {
                            (
                                Arc::clone(&r.sequencer),
                                SequencingInput {
                                    commit,
                                    node: t.record.clone(),
                                    property: property.clone(),
                                },
                            )
                        })
                    })
                })
                .collect()
        };

        if planned.is_empty() {
            debug!(%commit, touched = touched.len(), "commit triggered no sequencing");
            return CommitSignal::ready(
                commit,
                Ok(SequencingReport {
                    commit,
                    tasks: Vec::new(),
                }),
            );
        }

        let tracker = Arc::new(CommitTracker::new(commit, planned.len()));
        for (sequencer, input) in planned {
            let task = Arc::new(SequencingTask::new(
                self.inner.next_task.fetch_add(1, Ordering::Relaxed),
                commit,
                sequencer.name(),
                input.node.id,
                &input.node.path,
            ));
            self.inner
                .active
                .lock()
                .expect("task lock poisoned")
                .insert(task.id, Arc::clone(&task));

            let inner = Arc::clone(&self.inner);
            let tracker = Arc::clone(&tracker);
            self.inner
                .runtime
                .spawn(async move { inner.run(task, sequencer, input, tracker).await });
        }
        tracker.signal.clone()
    }

    /// Wait until no task or follow-up is outstanding.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one follow-up slot when dropped, including on panic or
/// runtime shutdown.
struct FollowUpGuard(Arc<CoordinatorInner>);

impl Drop for FollowUpGuard {
    fn drop(&mut self) {
        if self.0.follow_ups.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.notify_if_idle();
        }
    }
}

impl CoordinatorInner {
    fn is_idle(&self) -> bool {
        self.follow_ups.load(Ordering::Acquire) == 0
            && self.active.lock().expect("task lock poisoned").is_empty()
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    async fn run(
        self: Arc<Self>,
        task: Arc<SequencingTask>,
        sequencer: Arc<dyn Sequencer>,
        input: SequencingInput,
        tracker: Arc<CommitTracker>,
    ) {
        task.transition(TaskStatus::Running);
        debug!(task = task.id, sequencer = %task.sequencer, path = %task.path, "sequencing task started");

        // Run the sequencer as its own task so a panic is contained.
        let execution = {
            let input = input.clone();
            self.runtime
                .spawn(async move { sequencer.execute(&input).await })
        };
        let result = match execution.await {
            Ok(Ok(output)) => self.write_output(&input, output),
            Ok(Err(e)) => Err(e),
            Err(join) => Err(SequencingError::Aborted {
                path: task.path.clone(),
                reason: join.to_string(),
            }),
        };

        let (derived, failure) = match result {
            Ok(derived) => {
                task.transition(TaskStatus::Done);
                debug!(task = task.id, path = %task.path, derived, "sequencing task finished");
                (derived, None)
            }
            Err(e) => {
                task.transition(TaskStatus::Failed);
                warn!(task = task.id, path = %task.path, error = %e, "sequencing task failed");
                (0, Some(e))
            }
        };

        if let Some(outcome) = tracker.finish(task.report(derived), failure) {
            self.publish(task.commit, &outcome);
        }

        let drained = {
            let mut active = self.active.lock().expect("task lock poisoned");
            active.remove(&task.id);
            active.is_empty()
        };
        if drained {
            self.notify_if_idle();
        }
    }

    /// Replace the node's derived children with `output`.
    fn write_output(&self, input: &SequencingInput, output: SequencerOutput) -> SequencingResult<usize> {
        let Some(current) = self.store.node(&input.node.id) else {
            debug!(path = %input.node.path, "node removed before sequencing output was written");
            return Ok(0);
        };
        if current.property(&input.property.name) != Some(&input.property) {
            debug!(path = %input.node.path, "sequencing input superseded by a later commit");
            return Ok(0);
        }

        let mut ops: Vec<ChangeOp> = current
            .children
            .iter()
            .filter_map(|child| self.store.node(child))
            .filter(|child| child.has_mixin(mixins::DERIVED))
            .map(|child| ChangeOp::RemoveNode { id: child.id })
            .collect();
        for node in &output.nodes {
            push_derived(&mut ops, current.id, node);
        }
        if ops.is_empty() {
            return Ok(0);
        }

        self.store
            .apply(ChangeSet::new(SYSTEM_USER, ops))
            .map_err(|e| SequencingError::Output {
                path: input.node.path.clone(),
                reason: e.to_string(),
            })?;
        Ok(output.node_count())
    }

    fn publish(&self, commit: CommitId, outcome: &SequencingOutcome) {
        match outcome {
            Ok(report) => {
                info!(%commit, tasks = report.tasks.len(), derived = report.derived(), "sequencing completed");
                self.bus.emit(
                    EventKind::SequencingCompleted,
                    EventPayload::Sequencing {
                        commit,
                        tasks: report.tasks.len(),
                        failure: None,
                    },
                );
            }
            Err(e) => {
                self.bus.emit(
                    EventKind::SequencingFailed,
                    EventPayload::Sequencing {
                        commit,
                        tasks: 0,
                        failure: Some(e.to_string()),
                    },
                );
            }
        }
    }
}

fn push_derived(ops: &mut Vec<ChangeOp>, parent: NodeId, node: &DerivedNode) {
    let id = NodeId::new();
    ops.push(ChangeOp::AddNode {
        id,
        parent,
        name: node.name.clone(),
        primary_type: node.primary_type.clone(),
        provisional: false,
    });
    ops.push(ChangeOp::AddMixin {
        id,
        mixin: mixins::DERIVED.to_string(),
    });
    ops.extend(node.properties.iter().map(|p| ChangeOp::SetProperty {
        id,
        property: p.clone(),
    }));
    for child in &node.children {
        push_derived(ops, id, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::DdlSequencer;
    use arbor_fabric::EventFilter;
    use arbor_store::{InMemoryNodeStore, NodeSource};
    use arbor_types::lexicon::{ddl, vdb};
    use arbor_types::Property;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::runtime::Runtime;

    const WAIT: Duration = Duration::from_secs(10);

    struct Fixture {
        rt: Runtime,
        store: Arc<InMemoryNodeStore>,
        bus: Arc<EventBus>,
        coordinator: SequencingCoordinator,
    }

    impl Fixture {
        /// Block until every task and follow-up has finished.
        fn drain(&self) {
            self.rt.block_on(async {
                tokio::time::timeout(WAIT, self.coordinator.wait_idle()).await.unwrap();
            });
        }
    }

    fn fixture() -> Fixture {
        let rt = Runtime::new().unwrap();
        let store = Arc::new(InMemoryNodeStore::new());
        let bus = Arc::new(EventBus::new(64));
        let coordinator = SequencingCoordinator::new(store.clone(), bus.clone(), rt.handle().clone());
        coordinator.register(DdlSequencer::rule(), Arc::new(DdlSequencer));
        Fixture {
            rt,
            store,
            bus,
            coordinator,
        }
    }

    /// Commit a model node (or a new definition on it) and return what the
    /// commit touched.
    fn commit_model(store: &InMemoryNodeStore, existing: Option<NodeId>, ddl_text: &str) -> (CommitId, TouchedNode) {
        let mut ops = Vec::new();
        let id = existing.unwrap_or_else(|| {
            let id = NodeId::new();
            ops.push(ChangeOp::AddNode {
                id,
                parent: NodeId::ROOT,
                name: "model".into(),
                primary_type: vdb::MODEL.into(),
                provisional: false,
            });
            id
        });
        ops.push(ChangeOp::SetProperty {
            id,
            property: Property::single(vdb::MODEL_DEFINITION, ddl_text),
        });
        let applied = store.apply(ChangeSet::new("alice", ops)).unwrap();
        let touched = TouchedNode {
            record: store.node(&id).unwrap(),
            changed: vec![vdb::MODEL_DEFINITION.to_string()],
        };
        (applied.change_set.commit, touched)
    }

    #[test]
    fn commit_without_matches_settles_immediately() {
        let f = fixture();
        let record = NodeRecord::child_of(&NodeRecord::root(), NodeId::new(), "plain", "nt:unstructured");
        let signal = f.coordinator.submit(
            CommitId::new(),
            &[TouchedNode {
                record,
                changed: vec!["x".into()],
            }],
        );
        assert!(signal.is_settled());
        assert!(signal.outcome().unwrap().unwrap().tasks.is_empty());

        let empty = f.coordinator.submit(CommitId::new(), &[]);
        assert!(empty.is_settled());
        assert_eq!(f.coordinator.outstanding(), 0);
    }

    #[test]
    fn ddl_sequencing_writes_derived_children() {
        let f = fixture();
        let mut events = f.bus.subscribe(EventFilter::kind(EventKind::SequencingCompleted));
        let (commit, touched) = commit_model(
            &f.store,
            None,
            "CREATE FOREIGN TABLE customers (id integer, name string(64)); CREATE VIEW v AS SELECT 1",
        );

        let signal = f.coordinator.submit(commit, &[touched]);
        let report = signal.wait_timeout(WAIT).unwrap().unwrap();
        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].status, TaskStatus::Done);
        assert_eq!(report.derived(), 4);
        f.drain();
        assert_eq!(f.coordinator.outstanding(), 0);

        let snapshot = f.store.snapshot();
        let table = snapshot.get_by_path("/model/customers").unwrap();
        assert_eq!(table.primary_type, ddl::CREATE_TABLE);
        assert!(table.has_mixin(mixins::DERIVED));
        assert!(snapshot.get_by_path("/model/customers/name").is_some());
        assert!(snapshot.get_by_path("/model/v").is_some());

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::SequencingCompleted);
    }

    #[test]
    fn resequencing_replaces_derived_children() {
        let f = fixture();
        let (commit, touched) = commit_model(&f.store, None, "CREATE TABLE old_t (a integer)");
        let model = touched.record.id;
        f.coordinator.submit(commit, &[touched]).wait_timeout(WAIT).unwrap().unwrap();
        assert!(f.store.lookup("/model/old_t").is_some());

        let (commit, touched) = commit_model(&f.store, Some(model), "CREATE TABLE new_t (b integer)");
        f.coordinator.submit(commit, &[touched]).wait_timeout(WAIT).unwrap().unwrap();
        assert!(f.store.lookup("/model/old_t").is_none());
        assert!(f.store.lookup("/model/new_t/b").is_some());
    }

    #[test]
    fn failure_is_reported_and_persisted_state_kept() {
        let f = fixture();
        let mut events = f.bus.subscribe(EventFilter::kind(EventKind::SequencingFailed));
        let (commit, touched) = commit_model(&f.store, None, "CREATE TABLE broken (");

        let outcome = f.coordinator.submit(commit, &[touched]).wait_timeout(WAIT).unwrap();
        match outcome {
            Err(SequencingError::Failed { path, .. }) => assert_eq!(path, "/model"),
            other => panic!("unexpected outcome {other:?}"),
        }
        // The triggering commit stays persisted.
        let model = f.store.snapshot().get_by_path("/model").cloned().unwrap();
        assert!(model.property(vdb::MODEL_DEFINITION).is_some());
        assert!(model.children.is_empty());
        f.drain();
        assert_eq!(events.try_recv().unwrap().kind, EventKind::SequencingFailed);
    }

    struct Gated(Arc<Notify>);

    #[async_trait]
    impl Sequencer for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        async fn execute(&self, _input: &SequencingInput) -> SequencingResult<SequencerOutput> {
            self.0.notified().await;
            Ok(SequencerOutput::default())
        }
    }

    #[test]
    fn signal_waits_for_outstanding_tasks() {
        let f = fixture();
        let gate = Arc::new(Notify::new());
        f.coordinator.register(
            TriggerRule::new("test:gated", "test:input"),
            Arc::new(Gated(gate.clone())),
        );

        let mut record = NodeRecord::child_of(&NodeRecord::root(), NodeId::new(), "g", "test:gated");
        record
            .properties
            .insert("test:input".into(), Property::single("test:input", "go"));
        let signal = f.coordinator.submit(
            CommitId::new(),
            &[TouchedNode {
                record,
                changed: vec!["test:input".into()],
            }],
        );

        assert!(signal.wait_timeout(Duration::from_millis(50)).is_none());
        assert_eq!(f.coordinator.outstanding(), 1);

        gate.notify_one();
        let report = signal.wait_timeout(WAIT).unwrap().unwrap();
        // The node was never committed, so nothing was written.
        assert_eq!(report.derived(), 0);
        f.drain();
    }

    struct Panicking;

    #[async_trait]
    impl Sequencer for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _input: &SequencingInput) -> SequencingResult<SequencerOutput> {
            panic!("sequencer bug");
        }
    }

    #[test]
    fn panicking_sequencer_is_contained() {
        let f = fixture();
        f.coordinator.register(TriggerRule::new("test:boom", "p"), Arc::new(Panicking));
        let mut record = NodeRecord::child_of(&NodeRecord::root(), NodeId::new(), "b", "test:boom");
        record.properties.insert("p".into(), Property::single("p", "x"));

        let outcome = f
            .coordinator
            .submit(
                CommitId::new(),
                &[TouchedNode {
                    record,
                    changed: vec!["p".into()],
                }],
            )
            .wait_timeout(WAIT)
            .unwrap();
        assert!(matches!(outcome, Err(SequencingError::Aborted { .. })));
        f.drain();
        assert_eq!(f.coordinator.outstanding(), 0);
    }

    #[test]
    fn task_leaves_active_set_after_its_signal_settles() {
        let f = fixture();
        let (commit, touched) = commit_model(&f.store, None, "CREATE TABLE t (a integer)");
        let signal = f.coordinator.submit(commit, &[touched]);
        f.drain();
        assert!(signal.is_settled());
    }

    #[test]
    fn wait_idle_covers_follow_ups() {
        let f = fixture();
        let gate = Arc::new(Notify::new());
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        {
            let gate = gate.clone();
            f.coordinator.spawn_follow_up(async move {
                gate.notified().await;
                done_tx.send(()).unwrap();
            });
        }

        f.rt.block_on(async {
            let early = tokio::time::timeout(Duration::from_millis(50), f.coordinator.wait_idle()).await;
            assert!(early.is_err());
            gate.notify_one();
            tokio::time::timeout(WAIT, f.coordinator.wait_idle()).await.unwrap();
        });
        assert!(done_rx.try_recv().is_ok());
    }

    #[test]
    fn panicking_follow_up_still_releases_idle() {
        let f = fixture();
        f.coordinator.spawn_follow_up(async { panic!("listener bug") });
        f.drain();
    }
}
