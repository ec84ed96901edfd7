/*!
 * Checkpoint persistence.
 *
 * A checkpoint is written after every unit so an interrupted job resumes without
 * re-translating or re-billing finished work. Stores persist a checksummed envelope
 * and must replace the previous state atomically.
 *
 * - `models`: the record and job status types
 * - `manager`: single-writer bookkeeping over a store
 * - `file_store`: one JSON file per job
 * - `sqlite_store`: one row per job in SQLite
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::app_config::{CheckpointBackend, CheckpointConfig};
use crate::errors::TranslationError;

pub mod file_store;
pub mod manager;
pub mod models;
pub mod sqlite_store;

pub use file_store::FileCheckpointStore;
pub use manager::{resume_plan, CheckpointManager};
pub use models::{CheckpointRecord, FailureRecord, JobStatus};
pub use sqlite_store::SqliteCheckpointStore;

/// Version of the persisted envelope layout
pub const FORMAT_VERSION: u32 = 1;

/// Durable storage for checkpoint records, addressed by job id
#[async_trait]
pub trait CheckpointStore: Send + Sync + Debug {
    /// Load and validate a record; `Ok(None)` when the job has no checkpoint
    async fn load(&self, job_id: &str) -> Result<Option<CheckpointRecord>, TranslationError>;

    /// Atomically replace the stored record
    async fn save(&self, record: &CheckpointRecord) -> Result<(), TranslationError>;

    /// Remove a checkpoint; returns whether one existed
    async fn delete(&self, job_id: &str) -> Result<bool, TranslationError>;

    /// Job ids with a stored checkpoint
    async fn list(&self) -> Result<Vec<String>, TranslationError>;
}

/// Serialized form of a record with its integrity checksum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    pub format_version: u32,
    pub checksum: String,
    pub record: serde_json::Value,
}

fn checksum_of(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_string(value)?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

impl CheckpointEnvelope {
    pub fn seal(record: &CheckpointRecord) -> Result<Self, TranslationError> {
        let value = serde_json::to_value(record)
            .map_err(|e| TranslationError::Checkpoint(format!("Failed to serialize checkpoint: {}", e)))?;
        let checksum = checksum_of(&value)
            .map_err(|e| TranslationError::Checkpoint(format!("Failed to serialize checkpoint: {}", e)))?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            checksum,
            record: value,
        })
    }

    /// Verify and decode the record for `job_id`
    pub fn open(self, job_id: &str) -> Result<CheckpointRecord, TranslationError> {
        let corrupt = |reason: String| TranslationError::CheckpointCorruption {
            job_id: job_id.to_string(),
            reason,
        };

        if self.format_version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", self.format_version)));
        }
        let actual = checksum_of(&self.record).map_err(|e| corrupt(e.to_string()))?;
        if actual != self.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        let record: CheckpointRecord =
            serde_json::from_value(self.record).map_err(|e| corrupt(format!("invalid record: {}", e)))?;
        record.validate(job_id).map_err(corrupt)?;
        Ok(record)
    }

    /// Parse an envelope from its serialized form
    pub fn parse(job_id: &str, data: &str) -> Result<Self, TranslationError> {
        serde_json::from_str(data).map_err(|e| TranslationError::CheckpointCorruption {
            job_id: job_id.to_string(),
            reason: format!("unreadable checkpoint: {}", e),
        })
    }
}

/// Job ids end up in file names
pub(crate) fn validate_job_id(job_id: &str) -> Result<(), TranslationError> {
    let valid = !job_id.is_empty()
        && job_id.len() <= 128
        && job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TranslationError::InvalidConfig(format!("Invalid job id '{}'", job_id)))
    }
}

/// Open the configured checkpoint store
pub fn open_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>, TranslationError> {
    let directory = config
        .resolved_directory()
        .map_err(|e| TranslationError::Checkpoint(e.to_string()))?;
    open_store_at(config.backend, &directory)
}

/// Open a checkpoint store of the given kind under `directory`
pub fn open_store_at(backend: CheckpointBackend, directory: &Path) -> Result<Arc<dyn CheckpointStore>, TranslationError> {
    let store: Arc<dyn CheckpointStore> = match backend {
        CheckpointBackend::File => Arc::new(FileCheckpointStore::new(directory)?),
        CheckpointBackend::Sqlite => Arc::new(
            SqliteCheckpointStore::new(directory.join(sqlite_store::DEFAULT_DB_FILENAME))
                .map_err(|e| TranslationError::Checkpoint(e.to_string()))?,
        ),
    };
    Ok(store)
}
