/*!
 * Integration tests for the per-unit failure policy and fatal job errors
 */

use anyhow::Result;
use tinbox::app_config::Algorithm;
use tinbox::checkpoint::CheckpointStore;
use tinbox::document::Document;
use tinbox::errors::{ErrorKind, TranslationError};
use tinbox::providers::mock::MockTranslator;
use tinbox::{JobRequest, JobStatus};
use crate::common;

fn request(document: Document) -> JobRequest {
    JobRequest::new(document, "en", "fr", Algorithm::Page).with_concurrency(1)
}

/// Test that a unit refused once is translated by the bypass attempt
#[tokio::test]
async fn test_refusedOnce_withBypass_shouldComplete() {
    let mock = MockTranslator::working().refusing_once([0]);
    let engine = common::engine(&mock);

    let report = engine.translate(request(common::numbered_pages(2))).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(mock.dispatched(), vec![0, 0, 1]);
    assert_eq!(report.text, "[fr] Page 1.\n\n[fr] Page 2.");
}

/// Test that bypass can be turned off so a single refusal fails the unit
#[tokio::test]
async fn test_refusedOnce_withoutBypass_shouldFailUnit() {
    let mock = MockTranslator::working().refusing_once([0]);
    let mut config = common::test_config();
    config.translation.refusal_retry = false;
    let engine = common::engine_with(config, &mock, common::memory_store());

    let report = engine.translate(request(common::numbered_pages(2))).await.unwrap();

    assert_eq!(report.status, JobStatus::CompletedWithFailures);
    assert_eq!(report.failed[&0].kind, ErrorKind::ProviderRefusal);
    assert_eq!(report.failed[&0].attempts, 1);
    assert_eq!(report.completed, vec![1]);
}

/// Test that transient errors are retried until they succeed
#[tokio::test]
async fn test_transientErrors_withinBudget_shouldBeRetried() {
    let mock = MockTranslator::intermittent(2);
    let engine = common::engine(&mock);

    let report = engine.translate(request(common::numbered_pages(3))).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(mock.request_count(), 5);
    assert_eq!(mock.dispatched(), vec![0, 1, 1, 2, 2]);
}

/// Test that transient errors outliving the budget are recorded and the job goes on
#[tokio::test]
async fn test_transientErrors_beyondBudget_shouldRecordFailuresAndContinue() {
    let mock = MockTranslator::intermittent(1);
    let engine = common::engine(&mock);

    let report = engine.translate(request(common::numbered_pages(2))).await.unwrap();

    assert_eq!(report.status, JobStatus::CompletedWithFailures);
    assert!(report.completed.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.values().all(|f| f.kind == ErrorKind::TransientProvider && f.attempts == 3));
    assert_eq!(mock.request_count(), 6);
    assert_eq!(report.text, "Page 1.\n\nPage 2.");
}

/// Test that fail-fast mode aborts on the first failed unit
#[tokio::test]
async fn test_failFast_firstUnitRefused_shouldAbortJob() -> Result<()> {
    let mock = MockTranslator::working().refusing([0]);
    let mut config = common::test_config();
    config.translation.fail_fast = true;
    let store = common::memory_store();
    let engine = common::engine_with(config, &mock, store.clone());

    let handle = engine.start(request(common::numbered_pages(3))).await?;
    let job_id = handle.job_id().to_string();
    let err = handle.result().await.unwrap_err();

    assert!(matches!(
        err,
        TranslationError::FailFast { sequence_index: 0, kind: ErrorKind::ProviderRefusal, .. }
    ));
    assert_eq!(mock.dispatched_set().len(), 1);
    let record = store.load(&job_id).await?.expect("checkpoint should exist");
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.failed.contains_key(&0));
    Ok(())
}

/// Test that authentication failures abort the job without retries
#[tokio::test]
async fn test_terminalError_shouldAbortWithoutRetry() -> Result<()> {
    let mock = MockTranslator::failing();
    let store = common::memory_store();
    let engine = common::engine_with(common::test_config(), &mock, store.clone());

    let handle = engine.start(request(common::numbered_pages(4))).await?;
    let job_id = handle.job_id().to_string();
    let err = handle.result().await.unwrap_err();

    assert!(matches!(err, TranslationError::TerminalProvider(_)));
    assert_eq!(err.kind(), Some(ErrorKind::TerminalProvider));
    assert_eq!(mock.request_count(), 1);
    let record = store.load(&job_id).await?.expect("checkpoint should exist");
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.failed[&0].kind, ErrorKind::TerminalProvider);
    assert!(record.completed.is_empty());
    Ok(())
}

/// Test that a truncated unit is split and translated in halves
#[tokio::test]
async fn test_truncation_withResegmentation_shouldTranslateHalves() {
    let mock = MockTranslator::working().truncating_longer_than(30);
    let engine = common::engine(&mock);

    let report = engine
        .translate(request(common::pages(&["The first paragraph.\n\nThe second paragraph."])))
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.text, "[fr] The first paragraph.\n\n[fr] The second paragraph.");
    assert!(report.warnings.is_empty());
    assert_eq!(mock.request_count(), 3);
}

/// Test that without re-segmentation a truncated unit is kept and flagged
#[tokio::test]
async fn test_truncation_withoutResegmentation_shouldKeepPartialAndWarn() {
    let mock = MockTranslator::working().truncating_longer_than(30);
    let mut config = common::test_config();
    config.translation.resegment_on_truncation = false;
    let engine = common::engine_with(config, &mock, common::memory_store());

    let report = engine
        .translate(request(common::pages(&["The first paragraph.\n\nThe second paragraph."])))
        .await
        .unwrap();

    assert_eq!(report.completed, vec![0]);
    assert_eq!(report.text.chars().count(), 30);
    assert!(report.warnings.iter().any(|w| w.contains("truncated")));
    assert_eq!(mock.request_count(), 1);
}
