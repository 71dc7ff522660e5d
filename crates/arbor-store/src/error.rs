use arbor_types::TypeError;

/// Errors from node store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A node already exists at the target path.
    #[error("duplicate path: {0}")]
    DuplicatePath(String),

    /// The operation is structurally invalid (e.g. removing the root).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid path, name or value.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A logged change set could not be replayed on open.
    #[error("recovery failed at commit seq {seq}: {reason}")]
    Recovery { seq: u64, reason: String },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
