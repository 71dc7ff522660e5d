//! Search over committed Arbor state.
//!
//! Searches run against an immutable [`arbor_store::NodeTree`] snapshot, so
//! they only ever observe durably committed nodes and never a transaction's
//! pending work. Results are ordered by path, which keeps them stable for a
//! given snapshot.
//!
//! # Key Types
//!
//! - [`SearchCriteria`] -- type, path, path-pattern or keyword query
//! - [`KeywordCriteria`] -- ANY / ALL / NONE substring combination
//! - [`PathPattern`] -- `*` and `**` segment wildcards
//! - [`SearchEngine`] -- evaluates criteria against a snapshot

pub mod criteria;
pub mod engine;
pub mod error;
pub mod pattern;

pub use criteria::{KeywordCriteria, SearchCriteria};
pub use engine::SearchEngine;
pub use error::{SearchError, SearchResult};
pub use pattern::{glob_matches, PathPattern};
