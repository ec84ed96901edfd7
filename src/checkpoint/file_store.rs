/*!
 * File-backed checkpoint store.
 *
 * Each job lives in `<dir>/<job_id>.checkpoint.json`. Writes go to a temporary file in
 * the same directory, are flushed to disk, then renamed over the previous file, so an
 * interrupted write leaves the last good checkpoint in place.
 */

use async_trait::async_trait;
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{validate_job_id, CheckpointEnvelope, CheckpointRecord, CheckpointStore};
use crate::errors::TranslationError;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// Checkpoint store writing one JSON file per job
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

fn store_error(context: &str, error: impl std::fmt::Display) -> TranslationError {
    TranslationError::Checkpoint(format!("{}: {}", context, error))
}

impl FileCheckpointStore {
    /// Create a store, creating the directory if needed
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, TranslationError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)
            .map_err(|e| store_error(&format!("Failed to create checkpoint directory {:?}", directory), e))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of a job's checkpoint file
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.directory.join(format!("{}{}", job_id, CHECKPOINT_SUFFIX))
    }

    fn write_atomic(directory: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = NamedTempFile::new_in(directory)?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<CheckpointRecord>, TranslationError> {
        validate_job_id(job_id)?;
        let path = self.path_for(job_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(&format!("Failed to read checkpoint {:?}", path), e)),
        };
        let record = CheckpointEnvelope::parse(job_id, &data)?.open(job_id)?;
        debug!("Loaded checkpoint for job {} ({} units done)", job_id, record.completed.len());
        Ok(Some(record))
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<(), TranslationError> {
        validate_job_id(&record.job_id)?;
        let envelope = CheckpointEnvelope::seal(record)?;
        let data = serde_json::to_vec_pretty(&envelope).map_err(|e| store_error("Failed to serialize checkpoint", e))?;

        let directory = self.directory.clone();
        let path = self.path_for(&record.job_id);
        tokio::task::spawn_blocking(move || Self::write_atomic(&directory, &path, &data))
            .await
            .map_err(|e| store_error("Checkpoint write task failed", e))?
            .map_err(|e| store_error("Failed to write checkpoint", e))
    }

    async fn delete(&self, job_id: &str) -> Result<bool, TranslationError> {
        validate_job_id(job_id)?;
        match tokio::fs::remove_file(self.path_for(job_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_error("Failed to delete checkpoint", e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>, TranslationError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| store_error("Failed to list checkpoints", e))?;
        let mut job_ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error("Failed to list checkpoints", e))?
        {
            if let Some(job_id) = entry.file_name().to_str().and_then(|n| n.strip_suffix(CHECKPOINT_SUFFIX)) {
                job_ids.push(job_id.to_string());
            }
        }
        job_ids.sort();
        Ok(job_ids)
    }
}
