use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::change::ChangeSet;
use crate::error::{StoreError, StoreResult};

/// WAL entry: one committed change set with its commit sequence number.
///
/// On-disk format:
/// ```text
/// [4 bytes: entry length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WalEntry)]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub change_set: ChangeSet,
}

/// Flush/sync strategy for the WAL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every write (safest, highest latency).
    EveryWrite,
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
}

/// Configuration for the Write-Ahead Log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Sync/flush strategy.
    pub sync_mode: SyncMode,
    /// Write a snapshot and truncate the log once it grows past this many
    /// bytes (default: 16 MiB). Zero disables automatic checkpoints.
    pub checkpoint_after_bytes: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            checkpoint_after_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct WalWriter {
    writer: BufWriter<File>,
    /// Current write offset in the log file.
    offset: u64,
}

/// Crash-recoverable Write-Ahead Log of committed change sets.
///
/// Entries are serialized with bincode, framed with a length prefix and a
/// CRC32 checksum, and appended to a single file. On recovery the file is
/// read front-to-back and stops at the first torn or corrupt frame; the
/// file is cut back to the end of the last good frame so later appends
/// stay reachable.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    config: WalConfig,
}

impl WriteAheadLog {
    /// Open (or create) a log file at the given path.
    pub fn open(path: &Path, config: WalConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let offset = file.metadata()?.len();
        let writer = BufWriter::new(file);

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter { writer, offset }),
            config,
        })
    }

    /// Append a single entry. Returns the byte offset of the entry.
    pub fn append(&self, entry: &WalEntry) -> StoreResult<u64> {
        let payload =
            bincode::serialize(entry).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let length = u32::try_from(payload.len()).map_err(|_| {
            StoreError::Serialization(format!("change set too large: {} bytes", payload.len()))
        })?;
        let crc = crc32fast::hash(&payload);

        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        let entry_offset = w.offset;

        let written = write_frame(&mut w.writer, length, crc, &payload).and_then(|()| {
            if self.config.sync_mode == SyncMode::EveryWrite {
                w.writer.get_ref().sync_all()?;
            }
            Ok(())
        });
        if let Err(e) = written {
            warn!(offset = entry_offset, seq = entry.seq, error = %e, "WAL append failed; discarding partial frame");
            if let Err(rewind) = self.rewind(&mut w, entry_offset) {
                warn!(offset = entry_offset, error = %rewind, "failed to discard partial WAL frame");
            }
            return Err(e.into());
        }

        w.offset += HEADER_SIZE as u64 + payload.len() as u64;

        debug!(offset = entry_offset, seq = entry.seq, len = payload.len(), "WAL append");
        Ok(entry_offset)
    }

    /// Cut the file back to `offset`, dropping anything still buffered.
    fn rewind(&self, w: &mut WalWriter, offset: u64) -> StoreResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(offset)?;
        let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
        let (_file, _unflushed) = stale.into_parts();
        w.offset = offset;
        Ok(())
    }

    /// Recover all valid entries.
    pub fn recover(&self) -> StoreResult<Vec<WalEntry>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut entries = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header_buf = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header_buf[0], header_buf[1], header_buf[2], header_buf[3]]);
            let expected_crc = u32::from_le_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);

            if length == 0 || (offset + HEADER_SIZE as u64 + length as u64) > file_len {
                warn!(offset, length, file_len, "invalid WAL entry length; stopping recovery");
                break;
            }


            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated WAL entry; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; stopping recovery");
                break;
            }

            match bincode::deserialize::<WalEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(offset, error = %e, "failed to deserialize WAL entry; stopping recovery");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        if offset < file_len {
            warn!(offset, discarded = file_len - offset, "truncating WAL after last valid entry");
            let mut w = self.writer.lock().expect("WAL mutex poisoned");
            w.writer.flush()?;
            self.rewind(&mut w, offset)?;
        }

        debug!(recovered = entries.len(), "WAL recovery complete");
        Ok(entries)
    }

    /// Remove all data from the log.
    pub fn truncate(&self) -> StoreResult<()> {
        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        w.writer.flush()?;

        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;

        // Reopen in append mode so later writes land at the new end.
        let file = OpenOptions::new().append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = 0;

        debug!("WAL truncated");
        Ok(())
    }

    /// Current write offset (log size in bytes).
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("WAL mutex poisoned").offset
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_frame(writer: &mut BufWriter<File>, length: u32, crc: u32, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&length.to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}
