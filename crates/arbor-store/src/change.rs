use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbor_types::{CommitId, NodeId, Property, PropertyValues, Value};

/// A single buffered mutation.
///
/// Operations address nodes by identifier so that a change set stays valid
/// when replayed from the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChangeOp {
    AddNode {
        id: NodeId,
        parent: NodeId,
        name: String,
        primary_type: String,
        /// Created on demand rather than by explicit request. If another
        /// commit has already created a node at the same path, the existing
        /// node is reused instead of failing.
        provisional: bool,
    },
    /// Remove a node and its entire subtree.
    RemoveNode { id: NodeId },
    SetProperty { id: NodeId, property: Property },
    RemoveProperty { id: NodeId, name: String },
    AddMixin { id: NodeId, mixin: String },
    RemoveMixin { id: NodeId, mixin: String },
}

impl ChangeOp {
    /// The node this operation mutates.
    pub fn target(&self) -> NodeId {
        match self {
            Self::AddNode { id, .. }
            | Self::RemoveNode { id }
            | Self::SetProperty { id, .. }
            | Self::RemoveProperty { id, .. }
            | Self::AddMixin { id, .. }
            | Self::RemoveMixin { id, .. } => *id,
        }
    }

    /// Rewrite node identifiers (including reference values) through `map`.
    pub fn remap(&mut self, map: &HashMap<NodeId, NodeId>) {
        if map.is_empty() {
            return;
        }
        let swap = |id: &mut NodeId| {
            if let Some(to) = map.get(id) {
                *id = *to;
            }
        };
        match self {
            Self::AddNode { id, parent, .. } => {
                swap(id);
                swap(parent);
            }
            Self::SetProperty { id, property } => {
                swap(id);
                match &mut property.values {
                    PropertyValues::Single(value) => remap_value(value, map),
                    PropertyValues::Multiple(values) => {
                        values.iter_mut().for_each(|v| remap_value(v, map))
                    }
                }
            }
            Self::RemoveNode { id }
            | Self::RemoveProperty { id, .. }
            | Self::AddMixin { id, .. }
            | Self::RemoveMixin { id, .. } => swap(id),
        }
    }
}

fn remap_value(value: &mut Value, map: &HashMap<NodeId, NodeId>) {
    if let Value::Reference(id) = value {
        if let Some(to) = map.get(id) {
            *id = *to;
        }
    }
}

/// An ordered batch of operations committed atomically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub commit: CommitId,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub ops: Vec<ChangeOp>,
}

impl ChangeSet {
    pub fn new(user: impl Into<String>, ops: Vec<ChangeOp>) -> Self {
        Self {
            commit: CommitId::new(),
            user: user.into(),
            created_at: Utc::now(),
            ops,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct target nodes in first-touched order.
    pub fn touched(&self) -> Vec<NodeId> {
        let mut seen = Vec::new();
        for op in &self.ops {
            let id = op.target();
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen
    }

    /// Names of properties set on `id` by this change set.
    pub fn properties_set_on(&self, id: &NodeId) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for op in &self.ops {
            if let ChangeOp::SetProperty { id: target, property } = op {
                if target == id && !names.contains(&property.name) {
                    names.push(property.name.clone());
                }
            }
        }
        names
    }
}

/// Outcome of a successful [`crate::NodeStore::apply`].
#[derive(Clone, Debug)]
pub struct AppliedCommit {
    /// Monotonic commit sequence number within this store.
    pub seq: u64,
    /// The change set as persisted, after provisional nodes were reconciled.
    pub change_set: ChangeSet,
    /// Provisional node ids that were mapped onto already-existing nodes.
    pub remapped: Vec<(NodeId, NodeId)>,
}
