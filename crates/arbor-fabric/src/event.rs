use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbor_types::CommitId;

/// Classification of repository events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The repository finished starting and is reachable.
    RepositoryStarted,
    /// The repository shut down and is no longer reachable.
    RepositoryStopped,
    /// A transaction's changes were persisted.
    TransactionCommitted,
    /// A transaction was rolled back.
    TransactionRolledBack,
    /// Every sequencing task of a commit finished successfully.
    SequencingCompleted,
    /// A sequencing task of a commit failed.
    SequencingFailed,
    /// An error that has no other channel back to a caller.
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        Self::RepositoryStarted,
        Self::RepositoryStopped,
        Self::TransactionCommitted,
        Self::TransactionRolledBack,
        Self::SequencingCompleted,
        Self::SequencingFailed,
        Self::Error,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RepositoryStarted => "RepositoryStarted",
            Self::RepositoryStopped => "RepositoryStopped",
            Self::TransactionCommitted => "TransactionCommitted",
            Self::TransactionRolledBack => "TransactionRolledBack",
            Self::SequencingCompleted => "SequencingCompleted",
            Self::SequencingFailed => "SequencingFailed",
            Self::Error => "Error",
        };
        write!(f, "{s}")
    }
}

/// Payload data carried by an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    /// Empty payload (event kind is self-describing).
    Empty,
    /// Lifecycle payload naming the storage backend.
    Lifecycle { storage: String },
    /// Transaction payload.
    Transaction {
        name: String,
        user: String,
        commit: Option<CommitId>,
        changes: usize,
    },
    /// Sequencing outcome for one commit.
    Sequencing {
        commit: CommitId,
        tasks: usize,
        failure: Option<String>,
    },
    /// Free-form error description.
    Error { message: String },
}

/// A single event delivered through the bus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEvent {
    /// Bus-assigned sequence number, increasing in emission order.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl RepositoryEvent {
    pub fn new(id: u64, kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }
}

impl fmt::Display for RepositoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} at {}", self.id, self.kind, self.timestamp.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_display() {
        assert_eq!(EventKind::SequencingFailed.to_string(), "SequencingFailed");
        assert_eq!(EventKind::ALL.len(), 7);
    }

    #[test]
    fn events_serialize() {
        let event = RepositoryEvent::new(
            3,
            EventKind::TransactionCommitted,
            EventPayload::Transaction {
                name: "tx".into(),
                user: "alice".into(),
                commit: Some(CommitId::new()),
                changes: 2,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: RepositoryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
