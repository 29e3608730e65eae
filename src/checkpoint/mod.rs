//! Per-entity progress, so a rerun resumes instead of repeating spend.
//!
//! A checkpoint is replaced as a whole: workers never observe or persist a
//! partially written profile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{QualifiedName, SemanticProfile};
use crate::{Error, Result};

/// Where an entity stands after its last run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum EntityState {
    /// Profile exists, graph write not yet done.
    Synthesized { profile: SemanticProfile },
    /// Profile written to the graph.
    Materialized { profile: SemanticProfile },
    /// Synthesis ran out of attempts.
    Unresolved { attempts: u32, reason: String },
    /// Profile exists, graph write kept failing.
    WriteFailed { profile: SemanticProfile, reason: String },
    /// Stopped at the cost gate.
    Declined,
}

impl EntityState {
    pub fn profile(&self) -> Option<&SemanticProfile> {
        match self {
            EntityState::Synthesized { profile }
            | EntityState::Materialized { profile }
            | EntityState::WriteFailed { profile, .. } => Some(profile),
            EntityState::Unresolved { .. } | EntityState::Declined => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityState::Synthesized { .. } => "synthesized",
            EntityState::Materialized { .. } => "materialized",
            EntityState::Unresolved { .. } => "unresolved",
            EntityState::WriteFailed { .. } => "write_failed",
            EntityState::Declined => "declined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entity: QualifiedName,
    pub state: EntityState,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(entity: QualifiedName, state: EntityState) -> Self {
        Self { entity, state, updated_at: Utc::now() }
    }

    /// Materialized from a dossier with this digest: nothing left to do.
    pub fn is_done_for(&self, digest: &str) -> bool {
        matches!(&self.state, EntityState::Materialized { profile } if profile.dossier_digest == digest)
    }

    /// A profile for this digest exists but has not reached the graph.
    pub fn reusable_profile(&self, digest: &str) -> Option<&SemanticProfile> {
        match &self.state {
            EntityState::Synthesized { profile } | EntityState::WriteFailed { profile, .. }
                if profile.dossier_digest == digest =>
            {
                Some(profile)
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    async fn load(&self, entity: &QualifiedName) -> Result<Option<Checkpoint>>;

    /// Replace the entity's checkpoint atomically.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Every checkpoint, ordered by entity.
    async fn all(&self) -> Result<Vec<Checkpoint>>;

    /// Sampling seed recorded by an earlier run.
    async fn run_seed(&self) -> Result<Option<u64>>;

    async fn save_run_seed(&self, seed: u64) -> Result<()>;
}

#[async_trait]
impl<C: CheckpointStore> CheckpointStore for Arc<C> {
    async fn load(&self, entity: &QualifiedName) -> Result<Option<Checkpoint>> {
        (**self).load(entity).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        (**self).save(checkpoint).await
    }

    async fn all(&self) -> Result<Vec<Checkpoint>> {
        (**self).all().await
    }

    async fn run_seed(&self) -> Result<Option<u64>> {
        (**self).run_seed().await
    }

    async fn save_run_seed(&self, seed: u64) -> Result<()> {
        (**self).save_run_seed(seed).await
    }
}

// ============================================================================
// MemoryCheckpoints
// ============================================================================

/// In-process checkpoints; cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpoints {
    entries: Arc<Mutex<BTreeMap<QualifiedName, Checkpoint>>>,
    seed: Arc<Mutex<Option<u64>>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn load(&self, entity: &QualifiedName) -> Result<Option<Checkpoint>> {
        Ok(self.entries.lock().get(entity).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        self.entries.lock().insert(checkpoint.entity.clone(), checkpoint);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.entries.lock().values().cloned().collect())
    }

    async fn run_seed(&self) -> Result<Option<u64>> {
        Ok(*self.seed.lock())
    }

    async fn save_run_seed(&self, seed: u64) -> Result<()> {
        *self.seed.lock() = Some(seed);
        Ok(())
    }
}

// ============================================================================
// FileCheckpoints
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    entities: BTreeMap<String, Checkpoint>,
}

const FILE_VERSION: u32 = 1;

/// JSON file of every checkpoint. Each save rewrites a temp file in the same
/// directory and renames it over the old one.
#[derive(Debug)]
pub struct FileCheckpoints {
    path: PathBuf,
    file: Mutex<CheckpointFile>,
}

impl FileCheckpoints {
    /// Open `path`, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: CheckpointFile = serde_json::from_str(&raw)?;
            if file.version != FILE_VERSION {
                return Err(Error::Config(format!(
                    "{}: checkpoint file version {} is not supported",
                    path.display(),
                    file.version
                )));
            }
            file
        } else {
            CheckpointFile { version: FILE_VERSION, ..CheckpointFile::default() }
        };
        debug!(path = %path.display(), entities = file.entities.len(), seed = ?file.seed, "checkpoints loaded");
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, file: &CheckpointFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), file)?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoints {
    async fn load(&self, entity: &QualifiedName) -> Result<Option<Checkpoint>> {
        Ok(self.file.lock().entities.get(&entity.to_string()).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut file = self.file.lock();
        let key = checkpoint.entity.to_string();
        let previous = file.entities.insert(key.clone(), checkpoint);
        if let Err(e) = self.persist(&file) {
            match previous {
                Some(p) => file.entities.insert(key, p),
                None => file.entities.remove(&key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.file.lock().entities.values().cloned().collect())
    }

    async fn run_seed(&self) -> Result<Option<u64>> {
        Ok(self.file.lock().seed)
    }

    async fn save_run_seed(&self, seed: u64) -> Result<()> {
        let mut file = self.file.lock();
        let previous = file.seed.replace(seed);
        if let Err(e) = self.persist(&file) {
            file.seed = previous;
            return Err(e);
        }
        Ok(())
    }
}
