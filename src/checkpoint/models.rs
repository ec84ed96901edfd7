/*!
 * Checkpoint data model.
 *
 * One `CheckpointRecord` per job. `completed` is append-only: an index, once
 * present, is never removed or replaced.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::app_config::Algorithm;
use crate::errors::ErrorKind;
use crate::translation::cost::CostLedger;
use crate::translation::page::SeamRepair;
use crate::translation::unit::{TokenUsage, UnitResult};

/// Status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but nothing dispatched yet
    Pending,
    /// Units are being translated
    Running,
    /// Every unit translated
    Completed,
    /// Finished, some units failed
    CompletedWithFailures,
    /// Aborted by a fatal error
    Failed,
    /// Stopped by the caller
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed_with_failures",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit that exhausted its attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    /// Usage billed by the failed attempts
    #[serde(default)]
    pub tokens_used: TokenUsage,
}

/// Durable progress of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub job_id: String,
    pub algorithm: Algorithm,
    pub total_units: usize,
    pub source_lang: String,
    pub target_lang: String,
    /// `provider:model`
    pub model: String,
    pub document_fingerprint: String,
    pub status: JobStatus,
    #[serde(default)]
    pub completed: BTreeMap<usize, UnitResult>,
    #[serde(default)]
    pub failed: BTreeMap<usize, FailureRecord>,
    /// Seam repairs keyed by the left page index
    #[serde(default)]
    pub seams: BTreeMap<usize, SeamRepair>,
    /// Everything billed for this job so far, failed attempts included
    #[serde(default)]
    pub ledger: CostLedger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(
        job_id: impl Into<String>,
        algorithm: Algorithm,
        total_units: usize,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        model: impl Into<String>,
        document_fingerprint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            algorithm,
            total_units,
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            model: model.into(),
            document_fingerprint: document_fingerprint.into(),
            status: JobStatus::Pending,
            completed: BTreeMap::new(),
            failed: BTreeMap::new(),
            seams: BTreeMap::new(),
            ledger: CostLedger::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_unit_completed(&self, sequence_index: usize) -> bool {
        self.completed.contains_key(&sequence_index)
    }

    /// Whether every unit has a result
    pub fn is_fully_completed(&self) -> bool {
        self.completed.len() == self.total_units
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Structural integrity checks run on every load
    pub fn validate(&self, expected_job_id: &str) -> Result<(), String> {
        if self.job_id != expected_job_id {
            return Err(format!("record belongs to job {}", self.job_id));
        }
        for (key, result) in &self.completed {
            if *key >= self.total_units {
                return Err(format!("completed unit {} is outside 0..{}", key, self.total_units));
            }
            if result.sequence_index != *key {
                return Err(format!(
                    "completed unit {} carries sequence index {}",
                    key, result.sequence_index
                ));
            }
        }
        if let Some(key) = self.failed.keys().find(|k| **k >= self.total_units) {
            return Err(format!("failed unit {} is outside 0..{}", key, self.total_units));
        }
        for (key, seam) in &self.seams {
            if *key + 1 >= self.total_units || seam.left_index != *key {
                return Err(format!("seam {} is not a valid page junction", key));
            }
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".to_string());
        }
        Ok(())
    }
}
