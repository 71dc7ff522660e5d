//! The Arbor repository.
//!
//! A [`Repository`] stores a tree of typed nodes and gives callers
//! transactional access to it through [`UnitOfWork`]s:
//!
//! - node operations buffer their mutations in the unit of work; nothing is
//!   visible to other transactions until commit persists it atomically
//! - commit hands every touched node to the sequencing coordinator and does
//!   not report completion (by returning, or by calling the
//!   [`CommitListener`]) until the derived content it triggered is written
//! - searches see only persisted state
//! - every user has a home under `/arbor/workspace`, created on first use
//! - subtrees can be published to, retrieved from and removed from the
//!   shared library under `/arbor/library`
//!
//! Lifecycle transitions run on an internal actor and are announced on the
//! event bus; register observers with [`Repository::add_observer`].

pub mod access;
pub mod config;
pub mod error;
pub mod library;
pub mod lifecycle;
pub mod nodes;
pub mod query;
pub mod repository;
pub mod transaction;
pub mod workspace;

pub use config::{RepositoryConfig, StorageConfig};
pub use error::{RepoError, RepoResult};
pub use library::{Artifact, ArtifactDescriptor};
pub use lifecycle::{ClientEvent, RepositoryState};
pub use nodes::Node;
pub use repository::Repository;
pub use transaction::{CommitHandle, CommitListener, CommitOutcome, TxState, UnitOfWork};

pub use arbor_fabric::{
    EventFilter, EventKind, EventLatch, ObserverId, RepositoryEvent, RepositoryObserver,
};
pub use arbor_search::{KeywordCriteria, SearchCriteria};
pub use arbor_sequencer::{
    DerivedNode, Sequencer, SequencerOutput, SequencingError, SequencingInput, SequencingReport,
    SequencingResult, TriggerRule,
};
pub use arbor_store::{SyncMode, WalConfig};
pub use arbor_types::{lexicon, path, CommitId, NodeId, Property, Value, ValueType};
