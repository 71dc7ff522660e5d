use std::sync::Arc;

use crate::change::{AppliedCommit, ChangeSet};
use crate::error::StoreResult;
use crate::overlay::NodeSource;
use crate::tree::NodeTree;

/// Committed node storage.
///
/// All implementations must satisfy these invariants:
/// - `apply` is atomic: either every operation of the change set becomes
///   visible or none does, and a failed apply leaves the store unchanged.
/// - A durable backend persists the change set before it becomes visible.
/// - Snapshots are immutable; commits after `snapshot` never alter it.
/// - Reads through [`NodeSource`] always observe the latest committed state.
pub trait NodeStore: NodeSource + Send + Sync {
    /// Validate, persist and publish a change set.
    fn apply(&self, change_set: ChangeSet) -> StoreResult<AppliedCommit>;

    /// A consistent point-in-time view of the committed tree.
    fn snapshot(&self) -> Arc<NodeTree>;

    /// Sequence number of the latest commit.
    fn seq(&self) -> u64 {
        self.snapshot().seq()
    }

    /// Compact persisted state. A no-op for volatile stores.
    fn checkpoint(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Returns `true` if committed state survives a restart.
    fn is_durable(&self) -> bool {
        false
    }
}
