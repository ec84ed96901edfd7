/*!
 * Tests for checkpoint stores and the checkpoint manager
 */

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tinbox::app_config::{Algorithm, CheckpointBackend};
use tinbox::checkpoint::{
    open_store_at, resume_plan, CheckpointManager, CheckpointRecord, CheckpointStore, FailureRecord,
    FileCheckpointStore, JobStatus, SqliteCheckpointStore,
};
use tinbox::errors::{ErrorKind, TranslationError};
use tinbox::translation::cost::ModelPrice;
use tinbox::translation::unit::{FinishReason, TokenUsage, UnitKind, UnitResult};
use crate::common;

fn record(job_id: &str, total: usize) -> CheckpointRecord {
    CheckpointRecord::new(job_id, Algorithm::Page, total, "en", "fr", "openai:gpt-4o-mini", "fingerprint")
}

fn result(index: usize, text: &str) -> UnitResult {
    UnitResult {
        sequence_index: index,
        translated_text: text.to_string(),
        tokens_used: TokenUsage::new(100, 120),
        model_used: "gpt-4o-mini".to_string(),
        finish_reason: FinishReason::Complete,
        unit_kind: UnitKind::Text,
    }
}

/// Test that both backends keep records across a reopen of the store
#[tokio::test]
async fn test_stores_reopened_shouldKeepRecords() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;

    for backend in [CheckpointBackend::File, CheckpointBackend::Sqlite] {
        let store = open_store_at(backend, temp_dir.path())?;
        let mut manager = CheckpointManager::create(store, record("job-persist", 3)).await?;
        manager.record_unit(result(0, "zéro")).await?;
        manager.record_unit(result(2, "deux")).await?;
        manager.set_status(JobStatus::Cancelled).await?;
        drop(manager);

        let reopened = open_store_at(backend, temp_dir.path())?;
        let loaded = reopened.load("job-persist").await?.expect("record should exist");
        assert_eq!(loaded.status, JobStatus::Cancelled);
        assert_eq!(loaded.completed.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(loaded.completed[&0].translated_text, "zéro");
        assert_eq!(loaded.ledger.tokens, TokenUsage::new(200, 240));
        assert_eq!(resume_plan(&loaded, loaded.total_units), BTreeSet::from([1]));
    }
    Ok(())
}

/// Test that the SQLite backend creates its database file
#[tokio::test]
async fn test_sqliteStore_onDisk_shouldCreateDatabase() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("jobs.db");
    let store = SqliteCheckpointStore::new(&path)?;
    store.save(&record("job-sql", 1)).await?;

    assert!(path.exists());
    assert_eq!(store.list().await?, vec!["job-sql".to_string()]);
    assert!(store.delete("job-sql").await?);
    assert!(!store.delete("job-sql").await?);
    Ok(())
}

/// Test that a half-written checkpoint file is reported as corruption
#[tokio::test]
async fn test_fileStore_truncatedFile_shouldBeCorruption() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let store = FileCheckpointStore::new(temp_dir.path())?;
    store.save(&record("job-cut", 2)).await?;

    let path = store.path_for("job-cut");
    let data = std::fs::read_to_string(&path)?;
    std::fs::write(&path, &data[..data.len() / 2])?;

    let err = store.load("job-cut").await.unwrap_err();
    assert!(matches!(err, TranslationError::CheckpointCorruption { .. }));
    assert_eq!(err.kind(), Some(ErrorKind::CheckpointCorruption));
    Ok(())
}

/// Test that an edited record fails its checksum
#[tokio::test]
async fn test_fileStore_editedRecord_shouldBeCorruption() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let store: Arc<dyn CheckpointStore> = common::file_store(temp_dir.path());
    let mut manager = CheckpointManager::create(store.clone(), record("job-edit", 2)).await?;
    manager.record_unit(result(0, "bonjour")).await?;

    let path = temp_dir.path().join("job-edit.checkpoint.json");
    let data = std::fs::read_to_string(&path)?;
    std::fs::write(&path, data.replace("bonjour", "bonsoir"))?;

    let err = CheckpointManager::resume(store, &record("job-edit", 2)).await.unwrap_err();
    assert!(matches!(err, TranslationError::CheckpointCorruption { ref job_id, .. } if job_id == "job-edit"));
    Ok(())
}

/// Test that repeated saves replace the file without leaving temporary files behind
#[tokio::test]
async fn test_fileStore_repeatedSaves_shouldLeaveOneFile() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let store: Arc<dyn CheckpointStore> = common::file_store(temp_dir.path());
    let mut manager = CheckpointManager::create(store.clone(), record("job-atomic", 4)).await?;
    for index in 0..4 {
        manager.record_unit(result(index, "texte")).await?;
    }

    let files = std::fs::read_dir(temp_dir.path())?.count();
    assert_eq!(files, 1);
    assert_eq!(store.list().await?, vec!["job-atomic".to_string()]);
    Ok(())
}

/// Test that resuming against a different document is refused
#[tokio::test]
async fn test_resume_differentDocument_shouldBeMismatch() -> Result<()> {
    let store = common::memory_store();
    CheckpointManager::create(store.clone(), record("job-doc", 3)).await?;

    let mut other = record("job-doc", 3);
    other.document_fingerprint = "another".to_string();
    let err = CheckpointManager::resume(store.clone(), &other).await.unwrap_err();
    assert!(matches!(err, TranslationError::CheckpointMismatch { ref field, .. } if field == "document_fingerprint"));

    // Equivalent language codes are accepted
    let mut same = record("job-doc", 3);
    same.target_lang = "fra".to_string();
    assert!(CheckpointManager::resume(store, &same).await.is_ok());
    Ok(())
}

/// Test that completed units are append-only and billed once
#[tokio::test]
async fn test_manager_completedUnits_shouldBeAppendOnly() -> Result<()> {
    let store = common::memory_store();
    let mut manager = CheckpointManager::create(store, record("job-append", 3))
        .await?
        .with_price(ModelPrice::new("gpt-4o-mini", 0.15, 0.60));

    assert!(manager.record_unit(result(1, "un")).await?);
    let after_first = manager.record().ledger.clone();
    assert!(!manager.record_unit(result(1, "autre")).await?);
    assert!(!manager
        .record_failure(
            1,
            FailureRecord {
                kind: ErrorKind::ProviderRefusal,
                message: "refused".to_string(),
                attempts: 2,
                tokens_used: TokenUsage::new(5, 5),
            },
        )
        .await?);

    assert_eq!(manager.record().completed[&1].translated_text, "un");
    assert!(manager.record().failed.is_empty());
    assert_eq!(manager.record().ledger, after_first);
    assert!(manager.record_unit(result(5, "hors")).await.is_err());
    Ok(())
}
