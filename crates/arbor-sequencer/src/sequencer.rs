use async_trait::async_trait;

use arbor_store::NodeRecord;
use arbor_types::{CommitId, Property};

use crate::error::SequencingResult;

/// Input handed to a sequencer for one triggering node.
#[derive(Clone, Debug)]
pub struct SequencingInput {
    pub commit: CommitId,
    /// The node as committed by the triggering transaction.
    pub node: NodeRecord,
    /// The property that fired the rule.
    pub property: Property,
}

impl SequencingInput {
    /// Textual content of the triggering property.
    pub fn text(&self) -> Option<String> {
        self.property.text()
    }
}

/// A node to be created beneath the triggering node.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedNode {
    pub name: String,
    pub primary_type: String,
    pub properties: Vec<Property>,
    pub children: Vec<DerivedNode>,
}

impl DerivedNode {
    pub fn new(name: impl Into<String>, primary_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_type: primary_type.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_child(mut self, child: DerivedNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Number of nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(DerivedNode::count).sum::<usize>()
    }
}

/// Derived structure produced by a sequencer.
///
/// The output replaces every node previously derived beneath the triggering
/// node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SequencerOutput {
    pub nodes: Vec<DerivedNode>,
}

impl SequencerOutput {
    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(DerivedNode::count).sum()
    }
}

/// Derives structure from committed content.
///
/// Implementations must be pure with respect to the store: they receive a
/// snapshot of the triggering node and return the nodes to derive. The
/// coordinator writes the output.
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Name used in logs, task reports and error messages.
    fn name(&self) -> &str;

    async fn execute(&self, input: &SequencingInput) -> SequencingResult<SequencerOutput>;
}
