use std::sync::{Arc, RwLock};

use arbor_types::NodeId;

use crate::change::{AppliedCommit, ChangeSet};
use crate::error::StoreResult;
use crate::overlay::NodeSource;
use crate::record::NodeRecord;
use crate::traits::NodeStore;
use crate::tree::NodeTree;

/// Copy-on-write holder of the committed tree shared by the store backends.
pub(crate) struct TreeCell {
    tree: RwLock<Arc<NodeTree>>,
}

impl TreeCell {
    pub(crate) fn new(tree: NodeTree) -> Self {
        Self {
            tree: RwLock::new(Arc::new(tree)),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<NodeTree> {
        Arc::clone(&self.tree.read().expect("lock poisoned"))
    }

    /// Stage under the writer lock, run `persist`, then publish.
    ///
    /// If `persist` fails the staged changes are discarded.
    pub(crate) fn commit_with<F>(&self, change_set: ChangeSet, persist: F) -> StoreResult<AppliedCommit>
    where
        F: FnOnce(&AppliedCommit) -> StoreResult<()>,
    {
        let mut guard = self.tree.write().expect("lock poisoned");
        let (overlay, applied) = guard.stage(change_set)?;
        persist(&applied)?;
        Arc::make_mut(&mut *guard).merge(overlay, applied.seq);
        Ok(applied)
    }

    /// Run `f` against the current tree while holding off every writer.
    pub(crate) fn with_writers_blocked<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&NodeTree) -> StoreResult<()>,
    {
        let guard = self.tree.write().expect("lock poisoned");
        f(&guard)
    }

    pub(crate) fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.tree.read().expect("lock poisoned").node(id)
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<NodeId> {
        self.tree.read().expect("lock poisoned").lookup(path)
    }
}

/// In-memory node store.
///
/// Intended for tests and embedding. Nothing survives the process.
pub struct InMemoryNodeStore {
    cell: TreeCell,
}

impl InMemoryNodeStore {
    /// Create a store holding only the root node.
    pub fn new() -> Self {
        Self {
            cell: TreeCell::new(NodeTree::new()),
        }
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.cell.snapshot().len()
    }

    /// Always `false`: the root node is always present.
    pub fn is_empty(&self) -> bool {
        self.cell.snapshot().is_empty()
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSource for InMemoryNodeStore {
    fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.cell.node(id)
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        self.cell.lookup(path)
    }
}

impl NodeStore for InMemoryNodeStore {
    fn apply(&self, change_set: ChangeSet) -> StoreResult<AppliedCommit> {
        self.cell.commit_with(change_set, |_| Ok(()))
    }

    fn snapshot(&self) -> Arc<NodeTree> {
        self.cell.snapshot()
    }
}
