use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use arbor_store::WalConfig;

use crate::error::{RepoError, RepoResult};

/// Where the node tree lives.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Volatile; lost on shutdown.
    #[default]
    Memory,
    /// Snapshot plus write-ahead log in `dir`.
    File { dir: PathBuf },
}

impl StorageConfig {
    pub fn label(&self) -> String {
        match self {
            Self::Memory => "memory".to_string(),
            Self::File { dir } => format!("file:{}", dir.display()),
        }
    }
}

/// Repository configuration, loadable from TOML.
///
/// ```toml
/// commit_timeout_ms = 30000
/// sequencer_workers = 2
///
/// [storage]
/// kind = "file"
/// dir = "/var/lib/arbor"
///
/// [wal]
/// sync_mode = "every_write"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Bound on how long a synchronous commit waits for sequencing.
    #[serde(rename = "commit_timeout_ms", with = "millis")]
    pub commit_timeout: Duration,
    /// Worker threads of the runtime that runs sequencing tasks.
    pub sequencer_workers: usize,
    pub event_channel_capacity: usize,
    pub enable_ddl_sequencer: bool,
    pub storage: StorageConfig,
    pub wal: WalConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(30),
            sequencer_workers: 2,
            event_channel_capacity: 1024,
            enable_ddl_sequencer: true,
            storage: StorageConfig::Memory,
            wal: WalConfig::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn durable(dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::File { dir: dir.into() },
            ..Self::default()
        }
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn with_wal(mut self, wal: WalConfig) -> Self {
        self.wal = wal;
        self
    }

    pub fn from_toml_str(s: &str) -> RepoResult<Self> {
        toml::from_str(s).map_err(|e| RepoError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> RepoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepoError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> RepoResult<String> {
        toml::to_string_pretty(self).map_err(|e| RepoError::Config(e.to_string()))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
