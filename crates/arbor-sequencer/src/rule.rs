use std::fmt;

use arbor_store::NodeRecord;
use arbor_types::Property;

/// Value shape a triggering property must have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValueShape {
    /// Textual content: a string value, or binary content that is valid UTF-8.
    #[default]
    Text,
    /// Any value.
    Any,
}

/// Matches a (primary type, property name, value shape) triple.
///
/// A rule fires when a commit set the property on a node of the primary type
/// and the committed value has the expected shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerRule {
    pub primary_type: String,
    pub property: String,
    pub shape: ValueShape,
}

impl TriggerRule {
    /// A rule on textual content.
    pub fn new(primary_type: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            primary_type: primary_type.into(),
            property: property.into(),
            shape: ValueShape::Text,
        }
    }

    pub fn with_shape(mut self, shape: ValueShape) -> Self {
        self.shape = shape;
        self
    }

    /// The triggering property, if the rule fires for this node and commit.
    pub fn matches<'a>(&self, record: &'a NodeRecord, changed: &[String]) -> Option<&'a Property> {
        if record.primary_type != self.primary_type || !changed.contains(&self.property) {
            return None;
        }
        let property = record.property(&self.property)?;
        match self.shape {
            ValueShape::Any => Some(property),
            ValueShape::Text => property.text().map(|_| property),
        }
    }
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/@{}", self.primary_type, self.property)
    }
}
