/// Errors produced while sequencing a commit.
///
/// Errors are `Clone` so one failure can be handed to every party waiting on
/// the same commit.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SequencingError {
    /// A sequencer rejected its input.
    #[error("sequencer '{sequencer}' failed on {path}: {reason}")]
    Failed {
        sequencer: String,
        path: String,
        reason: String,
    },

    /// Derived output could not be written to the store.
    #[error("failed to write sequencer output for {path}: {reason}")]
    Output { path: String, reason: String },

    /// The task panicked or was cancelled before finishing.
    #[error("sequencing task for {path} aborted: {reason}")]
    Aborted { path: String, reason: String },

    /// Input text could not be parsed.
    #[error("parse error at byte {offset}: {reason}")]
    Parse { offset: usize, reason: String },
}

/// Convenience alias used throughout the sequencer crate.
pub type SequencingResult<T> = Result<T, SequencingError>;
