/*!
 * Checkpoint manager.
 *
 * Owns the in-memory `CheckpointRecord` of a running job and writes it through to the
 * store after every change. Only the engine's bookkeeping loop holds a manager, so the
 * record has exactly one writer.
 */

use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::{CheckpointRecord, CheckpointStore, FailureRecord, JobStatus};
use crate::errors::TranslationError;
use crate::language_utils::language_codes_match;
use crate::translation::cost::ModelPrice;
use crate::translation::page::SeamRepair;
use crate::translation::unit::UnitResult;

/// Indices still needing translation: everything in `0..total_units` not yet completed
pub fn resume_plan(record: &CheckpointRecord, total_units: usize) -> BTreeSet<usize> {
    (0..total_units)
        .filter(|index| !record.completed.contains_key(index))
        .collect()
}

/// Single-writer front end over a checkpoint store; also keeps the job's cost ledger
#[derive(Debug)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    record: CheckpointRecord,
    price: ModelPrice,
}

impl CheckpointManager {
    /// Load a job's record, or `None` when it has no checkpoint
    pub async fn load(store: &dyn CheckpointStore, job_id: &str) -> Result<Option<CheckpointRecord>, TranslationError> {
        store.load(job_id).await
    }

    /// Start tracking a new job and persist its empty record
    pub async fn create(store: Arc<dyn CheckpointStore>, record: CheckpointRecord) -> Result<Self, TranslationError> {
        info!("Creating checkpoint for job {}", record.job_id);
        store.save(&record).await?;
        let price = ModelPrice::free(record.model.clone());
        Ok(Self { store, record, price })
    }

    /// Reopen a job's checkpoint, checking that it belongs to the same document and settings
    pub async fn resume(store: Arc<dyn CheckpointStore>, expected: &CheckpointRecord) -> Result<Self, TranslationError> {
        let record = store
            .load(&expected.job_id)
            .await?
            .ok_or_else(|| TranslationError::CheckpointNotFound(expected.job_id.clone()))?;
        check_compatible(&record, expected)?;
        info!(
            "Resuming job {}: {}/{} units already translated",
            record.job_id,
            record.completed.len(),
            record.total_units
        );
        let price = ModelPrice::free(record.model.clone());
        Ok(Self { store, record, price })
    }

    /// Price used to bill recorded usage
    pub fn with_price(mut self, price: ModelPrice) -> Self {
        self.price = price;
        self
    }

    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    pub fn job_id(&self) -> &str {
        &self.record.job_id
    }

    /// Record a finished unit; returns false without writing if it was already recorded
    pub async fn record_unit(&mut self, result: UnitResult) -> Result<bool, TranslationError> {
        let index = result.sequence_index;
        if index >= self.record.total_units {
            return Err(TranslationError::Checkpoint(format!(
                "Unit {} is outside 0..{}",
                index, self.record.total_units
            )));
        }
        if self.record.completed.contains_key(&index) {
            debug!("Unit {} already recorded for job {}, ignoring", index, self.record.job_id);
            return Ok(false);
        }
        self.record.ledger.append(result.tokens_used, &self.price);
        self.record.completed.insert(index, result);
        self.record.failed.remove(&index);
        self.persist().await?;
        Ok(true)
    }

    /// Record a unit that exhausted its attempts; completed units are never demoted
    pub async fn record_failure(&mut self, index: usize, failure: FailureRecord) -> Result<bool, TranslationError> {
        if self.record.completed.contains_key(&index) || index >= self.record.total_units {
            warn!("Ignoring failure for unit {} of job {}", index, self.record.job_id);
            return Ok(false);
        }
        self.record.ledger.append(failure.tokens_used, &self.price);
        self.record.failed.insert(index, failure);
        self.persist().await?;
        Ok(true)
    }

    /// Record a seam repair; returns false if that seam was already recorded
    pub async fn record_seam(&mut self, repair: SeamRepair) -> Result<bool, TranslationError> {
        if self.record.seams.contains_key(&repair.left_index) {
            return Ok(false);
        }
        self.record.ledger.append(repair.tokens_used, &self.price);
        self.record.seams.insert(repair.left_index, repair);
        self.persist().await?;
        Ok(true)
    }

    /// Update the job status and persist it
    pub async fn set_status(&mut self, status: JobStatus) -> Result<(), TranslationError> {
        if self.record.status != status {
            self.record.status = status;
            self.persist().await?;
        }
        Ok(())
    }

    /// Remaining work for this job
    pub fn resume_plan(&self) -> BTreeSet<usize> {
        resume_plan(&self.record, self.record.total_units)
    }

    /// Delete the checkpoint of a fully completed job
    pub async fn cleanup(&self) -> Result<bool, TranslationError> {
        if !self.record.is_fully_completed() {
            return Ok(false);
        }
        info!("Removing checkpoint for completed job {}", self.record.job_id);
        self.store.delete(&self.record.job_id).await
    }

    pub fn into_record(self) -> CheckpointRecord {
        self.record
    }

    async fn persist(&mut self) -> Result<(), TranslationError> {
        self.record.touch();
        self.store.save(&self.record).await
    }
}

/// Reject resuming a record made for a different document or configuration
fn check_compatible(record: &CheckpointRecord, expected: &CheckpointRecord) -> Result<(), TranslationError> {
    let mismatch = |field: &str| TranslationError::CheckpointMismatch {
        job_id: expected.job_id.clone(),
        field: field.to_string(),
    };

    if record.algorithm != expected.algorithm {
        return Err(mismatch("algorithm"));
    }
    if !language_codes_match(&record.source_lang, &expected.source_lang) {
        return Err(mismatch("source_lang"));
    }
    if !language_codes_match(&record.target_lang, &expected.target_lang) {
        return Err(mismatch("target_lang"));
    }
    if record.model != expected.model {
        return Err(mismatch("model"));
    }
    if record.total_units != expected.total_units {
        return Err(mismatch("total_units"));
    }
    if record.document_fingerprint != expected.document_fingerprint {
        return Err(mismatch("document_fingerprint"));
    }
    Ok(())
}
