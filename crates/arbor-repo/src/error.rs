use std::sync::Arc;
use std::time::Duration;

use arbor_search::SearchError;
use arbor_sequencer::SequencingError;
use arbor_store::StoreError;
use arbor_types::TypeError;

use crate::transaction::TxState;

/// Errors surfaced by the repository API.
///
/// Every variant is `Clone` so one failure can reach the synchronous caller,
/// a commit listener and a [`crate::CommitHandle`] alike.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RepoError {
    /// The transaction is not in a state that permits the operation.
    #[error("transaction '{tx}' is {state}; cannot {operation}")]
    State {
        tx: String,
        state: TxState,
        operation: &'static str,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate path: {0}")]
    DuplicatePath(String),

    #[error("user '{user}' may not {operation} '{path}'")]
    AccessDenied {
        user: String,
        operation: &'static str,
        path: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Derived-content computation for a commit failed. The commit's own
    /// changes remain persisted.
    #[error("sequencing failed: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("transaction '{tx}' timed out after {waited:?} waiting for sequencing")]
    Timeout { tx: String, waited: Duration },

    #[error("repository is not reachable")]
    NotReachable,

    #[error("commit of '{tx}' failed: {reason}")]
    CommitFailed { tx: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("storage failure: {0}")]
    Store(Arc<StoreError>),
}

impl From<StoreError> for RepoError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NodeNotFound(what) => Self::NotFound(what),
            StoreError::DuplicatePath(p) => Self::DuplicatePath(p),
            StoreError::InvalidOperation(reason) => Self::InvalidArgument(reason),
            StoreError::Type(e) => Self::Type(e),
            other => Self::Store(Arc::new(other)),
        }
    }
}

impl From<SearchError> for RepoError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Type(e) => Self::Type(e),
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
