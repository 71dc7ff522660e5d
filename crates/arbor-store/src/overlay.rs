use std::collections::HashMap;

use arbor_types::path;
use arbor_types::NodeId;

use crate::change::ChangeOp;
use crate::error::{StoreError, StoreResult};
use crate::record::NodeRecord;

/// Read access to a node tree.
pub trait NodeSource {
    /// Read a node by identifier.
    fn node(&self, id: &NodeId) -> Option<NodeRecord>;

    /// Resolve a normalized path to a node identifier.
    fn lookup(&self, path: &str) -> Option<NodeId>;
}

/// Pending changes layered over a base tree.
///
/// Entries hold the full post-change record (`Some`) or a tombstone (`None`).
/// Every operation is validated against the combined view before anything is
/// written, so a failed [`Overlay::apply`] leaves the overlay untouched.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    nodes: HashMap<NodeId, Option<NodeRecord>>,
    paths: HashMap<String, Option<NodeId>>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no changes have been staged.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Read a node through the overlay.
    pub fn node<S: NodeSource + ?Sized>(&self, base: &S, id: &NodeId) -> Option<NodeRecord> {
        match self.nodes.get(id) {
            Some(entry) => entry.clone(),
            None => base.node(id),
        }
    }

    /// Resolve a path through the overlay.
    pub fn lookup<S: NodeSource + ?Sized>(&self, base: &S, path: &str) -> Option<NodeId> {
        match self.paths.get(path) {
            Some(entry) => *entry,
            None => base.lookup(path),
        }
    }

    /// Children of `id` through the overlay, in insertion order.
    pub fn children<S: NodeSource + ?Sized>(&self, base: &S, id: &NodeId) -> Vec<NodeRecord> {
        self.node(base, id)
            .map(|parent| {
                parent
                    .children
                    .iter()
                    .filter_map(|child| self.node(base, child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stage a single operation.
    pub fn apply<S: NodeSource + ?Sized>(&mut self, base: &S, op: &ChangeOp) -> StoreResult<()> {
        match op {
            ChangeOp::AddNode {
                id,
                parent,
                name,
                primary_type,
                ..
            } => {
                path::validate_name(name)?;
                let mut parent_record = self.require(base, parent)?;
                let child_path = path::join(&parent_record.path, name);
                if self.lookup(base, &child_path).is_some() {
                    return Err(StoreError::DuplicatePath(child_path));
                }
                if self.node(base, id).is_some() {
                    return Err(StoreError::InvalidOperation(format!(
                        "node id {id} is already in use"
                    )));
                }
                let record = NodeRecord::child_of(&parent_record, *id, name, primary_type);
                parent_record.children.push(*id);
                self.put(parent_record);
                self.put(record);
            }
            ChangeOp::RemoveNode { id } => {
                if id.is_root() {
                    return Err(StoreError::InvalidOperation(
                        "the root node cannot be removed".into(),
                    ));
                }
                let record = self.require(base, id)?;
                if let Some(parent_id) = record.parent {
                    let mut parent_record = self.require(base, &parent_id)?;
                    parent_record.children.retain(|c| c != id);
                    self.put(parent_record);
                }
                let mut pending = vec![record];
                while let Some(doomed) = pending.pop() {
                    pending.extend(doomed.children.iter().filter_map(|c| self.node(base, c)));
                    self.paths.insert(doomed.path, None);
                    self.nodes.insert(doomed.id, None);
                }
            }
            ChangeOp::SetProperty { id, property } => {
                let mut record = self.require(base, id)?;
                record
                    .properties
                    .insert(property.name.clone(), property.clone());
                self.put(record);
            }
            ChangeOp::RemoveProperty { id, name } => {
                let mut record = self.require(base, id)?;
                if record.properties.remove(name).is_some() {
                    self.put(record);
                }
            }
            ChangeOp::AddMixin { id, mixin } => {
                let mut record = self.require(base, id)?;
                if !record.has_mixin(mixin) {
                    record.mixins.push(mixin.clone());
                    self.put(record);
                }
            }
            ChangeOp::RemoveMixin { id, mixin } => {
                let mut record = self.require(base, id)?;
                if record.has_mixin(mixin) {
                    record.mixins.retain(|m| m != mixin);
                    self.put(record);
                }
            }
        }
        Ok(())
    }

    /// Consume the overlay into its node and path entries.
    pub fn into_parts(
        self,
    ) -> (
        HashMap<NodeId, Option<NodeRecord>>,
        HashMap<String, Option<NodeId>>,
    ) {
        (self.nodes, self.paths)
    }

    fn require<S: NodeSource + ?Sized>(&self, base: &S, id: &NodeId) -> StoreResult<NodeRecord> {
        self.node(base, id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))
    }

    fn put(&mut self, record: NodeRecord) {
        self.paths.insert(record.path.clone(), Some(record.id));
        self.nodes.insert(record.id, Some(record));
    }
}
