//! Foundation types for Arbor, a hierarchical typed object store.
//!
//! Every other Arbor crate depends on `arbor-types`.
//!
//! # Key Types
//!
//! - [`NodeId`] -- Stable, time-ordered node identifier (UUID v7)
//! - [`CommitId`] -- Identifier assigned to each persisted change set
//! - [`Value`] / [`ValueType`] -- Typed property values
//! - [`Property`] -- A named, single- or multi-valued property
//! - [`path`] -- Slash-delimited absolute path helpers
//! - [`lexicon`] -- Reserved namespace layout and well-known type names

pub mod error;
pub mod id;
pub mod lexicon;
pub mod path;
pub mod value;

pub use error::TypeError;
pub use id::{CommitId, NodeId};
pub use value::{Property, PropertyValues, Value, ValueType};
