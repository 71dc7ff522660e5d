use arbor_types::TypeError;

/// Errors from building or running a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    Type(#[from] TypeError),
}

pub type SearchResult<T> = Result<T, SearchError>;
