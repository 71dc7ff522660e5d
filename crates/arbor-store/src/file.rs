use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use arbor_types::NodeId;

use crate::change::{AppliedCommit, ChangeSet};
use crate::error::{StoreError, StoreResult};
use crate::memory::TreeCell;
use crate::overlay::NodeSource;
use crate::record::NodeRecord;
use crate::traits::NodeStore;
use crate::tree::NodeTree;
use crate::wal::{WalConfig, WalEntry, WriteAheadLog};

const WAL_FILE: &str = "changes.wal";
const SNAPSHOT_FILE: &str = "snapshot.bin";
const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format: u32,
    seq: u64,
    records: Vec<&'a NodeRecord>,
}

#[derive(Deserialize)]
struct SnapshotIn {
    format: u32,
    seq: u64,
    records: Vec<NodeRecord>,
}

/// Durable node store backed by a directory.
///
/// Layout:
/// ```text
/// <dir>/
///   snapshot.bin   # bincode image of the whole tree at some commit seq
///   changes.wal    # change sets committed after that snapshot
/// ```
///
/// Every change set is appended to the log before it becomes visible. On
/// open the snapshot is loaded and newer log entries are replayed. A
/// checkpoint writes a fresh snapshot (atomically, via rename) and truncates
/// the log.
pub struct FileNodeStore {
    dir: PathBuf,
    cell: TreeCell,
    wal: WriteAheadLog,
}

impl FileNodeStore {
    /// Open or create a store in `dir`, recovering any committed state.
    pub fn open(dir: impl AsRef<Path>, config: WalConfig) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut tree = load_snapshot(&dir.join(SNAPSHOT_FILE))?.unwrap_or_default();
        let snapshot_seq = tree.seq();

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config)?;
        let mut replayed = 0usize;
        for entry in wal.recover()? {
            let seq = entry.seq;
            if seq <= tree.seq() {
                debug!(seq, "skipping WAL entry already covered by snapshot");
                continue;
            }
            let (overlay, _) = tree
                .stage(entry.change_set)
                .map_err(|e| StoreError::Recovery {
                    seq,
                    reason: e.to_string(),
                })?;
            tree.merge(overlay, seq);
            replayed += 1;
        }

        info!(
            dir = %dir.display(),
            nodes = tree.len(),
            snapshot_seq,
            seq = tree.seq(),
            replayed,
            "opened file node store"
        );

        Ok(Self {
            dir,
            cell: TreeCell::new(tree),
            wal,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Size of the un-checkpointed log in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.offset()
    }
}

impl NodeSource for FileNodeStore {
    fn node(&self, id: &NodeId) -> Option<NodeRecord> {
        self.cell.node(id)
    }

    fn lookup(&self, path: &str) -> Option<NodeId> {
        self.cell.lookup(path)
    }
}

impl NodeStore for FileNodeStore {
    fn apply(&self, change_set: ChangeSet) -> StoreResult<AppliedCommit> {
        let applied = self.cell.commit_with(change_set, |applied| {
            let entry = WalEntry {
                seq: applied.seq,
                change_set: applied.change_set.clone(),
            };
            self.wal.append(&entry).map(|_| ())
        })?;

        let threshold = self.wal.config().checkpoint_after_bytes;
        if threshold > 0 && self.wal.offset() >= threshold {
            if let Err(e) = self.checkpoint() {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }
        Ok(applied)
    }

    fn snapshot(&self) -> Arc<NodeTree> {
        self.cell.snapshot()
    }

    fn checkpoint(&self) -> StoreResult<()> {
        self.cell.with_writers_blocked(|tree| {
            write_snapshot(&self.dir, tree)?;
            self.wal.truncate()?;
            info!(seq = tree.seq(), nodes = tree.len(), "checkpoint written");
            Ok(())
        })
    }

    fn is_durable(&self) -> bool {
        true
    }
}

fn load_snapshot(path: &Path) -> StoreResult<Option<NodeTree>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let snapshot: SnapshotIn =
        bincode::deserialize(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
    if snapshot.format != SNAPSHOT_FORMAT {
        return Err(StoreError::Serialization(format!(
            "unsupported snapshot format {}",
            snapshot.format
        )));
    }
    NodeTree::from_records(snapshot.records, snapshot.seq).map(Some)
}

fn write_snapshot(dir: &Path, tree: &NodeTree) -> StoreResult<()> {
    let snapshot = SnapshotOut {
        format: SNAPSHOT_FORMAT,
        seq: tree.seq(),
        records: tree.records().collect(),
    };
    let bytes =
        bincode::serialize(&snapshot).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(SNAPSHOT_FILE))
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
