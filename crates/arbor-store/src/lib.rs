//! Hierarchical node storage for Arbor.
//!
//! The store holds the durably committed node tree. It never sees a
//! transaction's pending work: transactions buffer [`ChangeOp`]s in their own
//! [`Overlay`] and hand a complete [`ChangeSet`] to [`NodeStore::apply`],
//! which stages every operation against the committed tree and either
//! publishes all of them or none.
//!
//! # Storage Backends
//!
//! - [`InMemoryNodeStore`] -- volatile store for tests and embedding
//! - [`FileNodeStore`] -- snapshot plus write-ahead log in a directory
//!
//! # Design Rules
//!
//! 1. Paths are unique; adding a child under an existing name fails.
//! 2. A change set is applied atomically: staged first, then logged, then
//!    published under a single writer lock.
//! 3. Readers take [`NodeStore::snapshot`] and are never disturbed by
//!    concurrent commits (copy-on-write tree).
//! 4. Children are owned by their parent's child list; the parent link is a
//!    plain identifier.

pub mod change;
pub mod error;
pub mod file;
pub mod memory;
pub mod overlay;
pub mod record;
pub mod traits;
pub mod tree;
pub mod wal;

pub use change::{AppliedCommit, ChangeOp, ChangeSet};
pub use error::{StoreError, StoreResult};
pub use file::FileNodeStore;
pub use memory::InMemoryNodeStore;
pub use overlay::{NodeSource, Overlay};
pub use record::NodeRecord;
pub use traits::NodeStore;
pub use tree::NodeTree;
pub use wal::{SyncMode, WalConfig, WalEntry, WriteAheadLog};
