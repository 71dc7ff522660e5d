use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use arbor_types::NodeId;

use crate::change::{AppliedCommit, ChangeOp, ChangeSet};
use crate::error::{StoreError, StoreResult};
use crate::overlay::{NodeSource, Overlay};
use crate::record::NodeRecord;

/// The committed node tree.
///
/// Holds every record by identifier plus a path index and a primary-type
/// index. Trees are cloned on write when a reader still holds a snapshot, so
/// a `NodeTree` reached through an `Arc` never changes underneath its reader.
#[derive(Clone, Debug)]
pub struct NodeTree {
    nodes: HashMap<NodeId, NodeRecord>,
    paths: HashMap<String, NodeId>,
    by_type: HashMap<String, BTreeSet<NodeId>>,
    seq: u64,
}

impl NodeTree {
    /// A tree containing only the root node.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: HashMap::new(),
            paths: HashMap::new(),
            by_type: HashMap::new(),
            seq: 0,
        };
        tree.insert(NodeRecord::root());
        tree
    }

    /// Rebuild a tree from a flat list of records (e.g. a snapshot).
    pub fn from_records(records: Vec<NodeRecord>, seq: u64) -> StoreResult<Self> {
        let mut tree = Self {
            nodes: HashMap::with_capacity(records.len()),
            paths: HashMap::with_capacity(records.len()),
            by_type: HashMap::new(),
            seq,
        };
        for record in records {
            tree.insert(record);
        }
        if !tree.nodes.contains_key(&NodeId::ROOT) {
            return Err(StoreError::Serialization(
                "snapshot does not contain the root node".into(),
            ));
        }
        Ok(tree)
    }

    /// Sequence number of the last merged commit.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the root node is always present.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&NodeRecord> {
        self.paths.get(path).and_then(|id| self.nodes.get(id))
    }

    pub fn root(&self) -> Option<&NodeRecord> {
        self.nodes.get(&NodeId::ROOT)
    }

    /// Children of `id` in insertion order.
    pub fn children(&self, id: &NodeId) -> Vec<&NodeRecord> {
        self.nodes
            .get(id)
            .map(|r| r.children.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    /// Every record, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    /// Records whose primary type is `primary_type`.
    pub fn of_primary_type<'a>(&'a self, primary_type: &str) -> impl Iterator<Item = &'a NodeRecord> + 'a {
        self.by_type
            .get(primary_type)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.nodes.get(id))
    }

    /// Depth-first pre-order walk of the subtree rooted at `id`.
    pub fn descendants(&self, id: &NodeId) -> Vec<&NodeRecord> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeRecord> = self.nodes.get(id).into_iter().collect();
        while let Some(record) = stack.pop() {
            stack.extend(record.children.iter().rev().filter_map(|c| self.nodes.get(c)));
            out.push(record);
        }
        out
    }

    /// Validate `change_set` against this tree without modifying it.
    ///
    /// Provisional node additions whose path already exists are dropped and
    /// every later reference to them is rewritten to the existing node.
    pub fn stage(&self, change_set: ChangeSet) -> StoreResult<(Overlay, AppliedCommit)> {
        let ChangeSet {
            commit,
            user,
            created_at,
            ops,
        } = change_set;

        let mut overlay = Overlay::new();
        let mut remapped: HashMap<NodeId, NodeId> = HashMap::new();
        let mut kept = Vec::with_capacity(ops.len());

        for mut op in ops {
            op.remap(&remapped);
            if let ChangeOp::AddNode {
                id,
                parent,
                name,
                provisional: true,
                ..
            } = &op
            {
                let existing = overlay
                    .node(self, parent)
                    .and_then(|p| overlay.lookup(self, &arbor_types::path::join(&p.path, name)));
                if let Some(existing) = existing {
                    debug!(%commit, provisional = %id, existing = %existing, "reusing existing node");
                    remapped.insert(*id, existing);
                    continue;
                }
            }
            overlay.apply(self, &op)?;
            kept.push(op);
        }

        let applied = AppliedCommit {
            seq: self.seq + 1,
            change_set: ChangeSet {
                commit,
                user,
                created_at,
                ops: kept,
            },
            remapped: remapped.into_iter().collect(),
        };
        Ok((overlay, applied))
    }

    /// Publish a staged overlay as commit `seq`.
    pub fn merge(&mut self, overlay: Overlay, seq: u64) {
        let (nodes, paths) = overlay.into_parts();
        for (id, entry) in nodes {
            if let Some(old) = self.nodes.remove(&id) {
                self.unindex_type(&old);
            }
            if let Some(record) = entry {
                self.by_type
                    .entry(record.primary_type.clone())
                    .or_default()
                    .insert(id);
                self.nodes.insert(id, record);
            }
        }
        for (path, entry) in paths {
            match entry {
                Some(id) => {
                    self.paths.insert(path, id);
                }
                None => {
                    self.paths.remove(&path);
                }
            }
        }
        self.seq = seq;
    }

    /// Stage and merge in one step.
    pub fn apply(&mut self, change_set: ChangeSet) -> StoreResult<AppliedCommit> {
        let (overlay, applied) = self.stage(change_set)?;
        self.merge(overlay, applied.seq);
        Ok(applied)
    }

    fn insert(&mut self, record: NodeRecord) {
        self.paths.insert(record.path.clone(), record.id);
        self.by_type
            .entry(record.primary_type.clone())
            .or_default()
            .insert(record.id);
        self.nodes.insert(record.id, record);
    }

    fn unindex_type(&mut self, record: &NodeRecord) {
        if let Some(ids) = self.by_type.get_mut(&record.primary_type) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.by_type.remove(&record.primary_type);
            }
        }
    }
}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSource for NodeTree {
    fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.nodes.get(id).cloned()
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path).copied()
    }
}
