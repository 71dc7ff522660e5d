use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use arbor_types::{CommitId, NodeId};

/// Lifecycle of a sequencing task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// One sequencer run for one triggering node of one commit.
#[derive(Debug)]
pub struct SequencingTask {
    pub id: u64,
    pub commit: CommitId,
    pub sequencer: String,
    pub node: NodeId,
    pub path: String,
    status: Mutex<TaskStatus>,
}

impl SequencingTask {
    pub fn new(id: u64, commit: CommitId, sequencer: &str, node: NodeId, path: &str) -> Self {
        Self {
            id,
            commit,
            sequencer: sequencer.to_string(),
            node,
            path: path.to_string(),
            status: Mutex::new(TaskStatus::Pending),
        }
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock().expect("task lock poisoned")
    }

    /// Move to `next`. Terminal states are final and transitions never go
    /// backwards.
    pub fn transition(&self, next: TaskStatus) -> bool {
        let mut status = self.status.lock().expect("task lock poisoned");
        let allowed = match (*status, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending | TaskStatus::Running, TaskStatus::Done | TaskStatus::Failed) => true,
            _ => false,
        };
        if allowed {
            *status = next;
        }
        allowed
    }

    pub fn report(&self, derived: usize) -> TaskReport {
        TaskReport {
            id: self.id,
            sequencer: self.sequencer.clone(),
            path: self.path.clone(),
            status: self.status(),
            derived,
        }
    }
}

/// Summary of a finished task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: u64,
    pub sequencer: String,
    pub path: String,
    pub status: TaskStatus,
    /// Number of derived nodes written.
    pub derived: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        let task = SequencingTask::new(1, CommitId::new(), "ddl", NodeId::new(), "/m");
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.transition(TaskStatus::Running));
        assert!(!task.transition(TaskStatus::Pending));
        assert!(task.transition(TaskStatus::Done));
        assert!(!task.transition(TaskStatus::Failed));
        assert!(task.status().is_terminal());
        assert_eq!(task.report(3).derived, 3);
        assert_eq!(task.report(3).status, TaskStatus::Done);
    }

    #[test]
    fn pending_task_can_fail_directly() {
        let task = SequencingTask::new(2, CommitId::new(), "ddl", NodeId::new(), "/m");
        assert!(task.transition(TaskStatus::Failed));
        assert_eq!(task.status().to_string(), "FAILED");
    }
}
