/*!
 * Integration tests for cancellation, resumption and cost accounting
 */

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tinbox::app_config::Algorithm;
use tinbox::checkpoint::{CheckpointStore, FileCheckpointStore};
use tinbox::document::Document;
use tinbox::providers::mock::MockTranslator;
use tinbox::{CancelSignal, JobRequest, JobStatus, TranslationError};
use crate::common;

fn request(document: Document) -> JobRequest {
    JobRequest::new(document, "en", "fr", Algorithm::Page).with_concurrency(1)
}

/// Test cancelling after two of five units, then resuming the remaining three
#[tokio::test]
async fn test_cancel_afterTwoOfFive_shouldPersistTwoAndResumeThree() -> Result<()> {
    let store = common::memory_store();
    let document = common::numbered_pages(5);

    let cancel = CancelSignal::new();
    let hook_cancel = cancel.clone();
    let first_mock = MockTranslator::working().with_call_hook(move |index| {
        if index == 1 {
            hook_cancel.cancel();
        }
    });
    let engine = common::engine_with(common::test_config(), &first_mock, store.clone());
    let handle = engine.start(request(document.clone()).with_cancel_signal(cancel)).await?;
    let job_id = handle.job_id().to_string();
    let cancelled = handle.result().await?;

    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.completed, vec![0, 1]);
    assert_eq!(cancelled.skipped, vec![2, 3, 4]);
    assert!(cancelled.text.ends_with("[fr] Page 2.\n\nPage 3.\n\nPage 4.\n\nPage 5."));

    let record = store.load(&job_id).await?.expect("checkpoint should exist");
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.completed.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

    let second_mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &second_mock, store.clone());
    let resumed = engine.translate(request(document.clone()).resume(job_id.as_str())).await?;

    assert_eq!(second_mock.dispatched(), vec![2, 3, 4]);
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.job_id, job_id);
    assert_eq!(resumed.completed, vec![0, 1, 2, 3, 4]);
    assert!(resumed.cost > cancelled.cost);

    // Same total as a run that was never interrupted
    let fresh_mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &fresh_mock, common::memory_store());
    let uninterrupted = engine.translate(request(document)).await?;
    assert_eq!(resumed.text, uninterrupted.text);
    assert_eq!(resumed.tokens_used, uninterrupted.tokens_used);
    assert!((resumed.cost - uninterrupted.cost).abs() < 1e-12);
    Ok(())
}

/// Test that resuming a finished job translates nothing and bills nothing more
#[tokio::test]
async fn test_resume_completedJob_shouldNotRetranslate() -> Result<()> {
    let store = common::memory_store();
    let document = common::numbered_pages(3);

    let first_mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &first_mock, store.clone());
    let first = engine.translate(request(document.clone())).await?;

    let second_mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &second_mock, store);
    let again = engine.translate(request(document).resume(first.job_id.as_str())).await?;

    assert_eq!(second_mock.request_count(), 0);
    assert_eq!(again.text, first.text);
    assert_eq!(again.tokens_used, first.tokens_used);
    assert!((again.cost - first.cost).abs() < 1e-12);
    Ok(())
}

/// Test that resuming retries only the units that failed before
#[tokio::test]
async fn test_resume_afterRefusal_shouldRetryOnlyFailedUnit() -> Result<()> {
    let store = common::memory_store();
    let document = common::numbered_pages(4);

    let refusing = MockTranslator::working().refusing([2]);
    let engine = common::engine_with(common::test_config(), &refusing, store.clone());
    let first = engine.translate(request(document.clone())).await?;
    assert_eq!(first.status, JobStatus::CompletedWithFailures);

    let working = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &working, store.clone());
    let resumed = engine.translate(request(document).resume(first.job_id.as_str())).await?;

    assert_eq!(working.dispatched_set(), HashSet::from([2]));
    assert_eq!(resumed.status, JobStatus::Completed);
    assert!(resumed.failed.is_empty());
    // The refused attempts stay billed
    assert!(resumed.cost > first.cost);
    Ok(())
}

/// Test that a checkpoint for another document cannot be resumed
#[tokio::test]
async fn test_resume_differentDocument_shouldBeMismatch() -> Result<()> {
    let store = common::memory_store();
    let mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &mock, store);
    let first = engine.translate(request(common::numbered_pages(2))).await?;

    let err = engine
        .start(request(common::pages(&["Other one.", "Other two."])).resume(first.job_id.as_str()))
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::CheckpointMismatch { .. }));
    Ok(())
}

/// Test that resuming an unknown job is reported
#[tokio::test]
async fn test_resume_unknownJob_shouldBeNotFound() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);

    let err = engine
        .start(request(common::numbered_pages(2)).resume("no-such-job"))
        .await
        .unwrap_err();

    assert!(matches!(err, TranslationError::CheckpointNotFound(_)));
    assert_eq!(mock.request_count(), 0);
}

/// Test that a corrupted checkpoint stops the resume before any call
#[tokio::test]
async fn test_resume_corruptedCheckpoint_shouldFailBeforeAnyCall() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let file_store = common::file_store(temp_dir.path());
    let store: Arc<dyn CheckpointStore> = file_store.clone();
    let document = common::numbered_pages(2);

    let mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &mock, store.clone());
    let first = engine.translate(request(document.clone())).await?;

    let path = file_store.path_for(&first.job_id);
    let data = std::fs::read_to_string(&path)?;
    std::fs::write(&path, data.replace("[fr] Page 1.", "[fr] Page 9."))?;

    let resumed_mock = MockTranslator::working();
    let engine = common::engine_with(common::test_config(), &resumed_mock, store);
    let err = engine
        .start(request(document).resume(first.job_id.as_str()))
        .await
        .unwrap_err();

    assert!(matches!(err, TranslationError::CheckpointCorruption { .. }));
    assert_eq!(resumed_mock.request_count(), 0);
    Ok(())
}

/// Test that a clean job removes its checkpoint when configured to
#[tokio::test]
async fn test_cleanupOnSuccess_completedJob_shouldDeleteCheckpoint() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::new(temp_dir.path())?);
    let mut config = common::test_config();
    config.checkpoint.cleanup_on_success = true;

    let mock = MockTranslator::working();
    let engine = common::engine_with(config, &mock, store.clone());
    let report = engine.translate(request(common::numbered_pages(2))).await?;

    assert_eq!(report.status, JobStatus::Completed);
    assert!(store.load(&report.job_id).await?.is_none());
    Ok(())
}
