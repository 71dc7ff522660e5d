use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use arbor_types::lexicon::types;
use arbor_types::{path, NodeId, Property};

/// A committed node as held by the store.
///
/// Records are plain data: the tree structure lives in `parent` and
/// `children` links, and a record's `path` is fixed for its lifetime since
/// nodes are never moved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub name: String,
    pub path: String,
    pub primary_type: String,
    pub mixins: Vec<String>,
    pub properties: BTreeMap<String, Property>,
    /// Child identifiers in insertion order.
    pub children: Vec<NodeId>,
}

impl NodeRecord {
    /// The parentless repository root.
    pub fn root() -> Self {
        Self {
            id: NodeId::ROOT,
            parent: None,
            name: String::new(),
            path: path::ROOT.to_string(),
            primary_type: types::ROOT.to_string(),
            mixins: Vec::new(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// A new empty child record beneath `parent`.
    pub fn child_of(parent: &NodeRecord, id: NodeId, name: &str, primary_type: &str) -> Self {
        Self {
            id,
            parent: Some(parent.id),
            name: name.to_string(),
            path: path::join(&parent.path, name),
            primary_type: primary_type.to_string(),
            mixins: Vec::new(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn has_mixin(&self, mixin: &str) -> bool {
        self.mixins.iter().any(|m| m == mixin)
    }

    /// Returns `true` if the node's primary type or one of its mixins is `type_name`.
    pub fn is_of_type(&self, type_name: &str) -> bool {
        self.primary_type == type_name || self.has_mixin(type_name)
    }
}
