/*!
 * Integration tests for page-by-page translation jobs
 */

use futures::StreamExt;
use tinbox::app_config::Algorithm;
use tinbox::document::Document;
use tinbox::errors::ErrorKind;
use tinbox::providers::mock::MockTranslator;
use tinbox::translation::unit::TranslationUnit;
use tinbox::{JobRequest, JobStatus};
use crate::common;

fn request(document: Document) -> JobRequest {
    JobRequest::new(document, "en", "fr", Algorithm::Page)
}

/// Test that a sentence broken across a page break is repaired at the junction
#[tokio::test]
async fn test_pageJob_brokenSentenceAtPageBreak_shouldRepairSeam() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);
    let document = common::pages(&["Alpha one.\nthe sentence breaks", "across the page.\nBeta ends."]);

    let report = engine.translate(request(document)).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(mock.seam_count(), 1);
    assert_eq!(
        report.text,
        "[fr] Alpha one.\n[fr] the sentence breaks ~\n\n[fr] across the page.\n[fr] Beta ends."
    );
}

/// Test that junctions at sentence ends are left alone
#[tokio::test]
async fn test_pageJob_sentenceEndsAtPageBreak_shouldNotRepair() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);
    let document = common::pages(&["Alpha one.\nAlpha two.", "Beta one.\nBeta two."]);

    let report = engine.translate(request(document)).await.unwrap();

    assert_eq!(mock.seam_count(), 0);
    assert_eq!(report.text, "[fr] Alpha one.\n[fr] Alpha two.\n\n[fr] Beta one.\n[fr] Beta two.");
}

/// Test the refused middle page scenario: no repair across the gap, order kept
#[tokio::test]
async fn test_pageJob_middlePageRefused_shouldSkipSeamsAndKeepOrder() {
    let mock = MockTranslator::working().refusing([1]);
    let engine = common::engine(&mock);
    let document = common::pages(&[
        "Page one starts.\npage one does not end",
        "Page two starts.\npage two does not end",
        "page three continues.\nPage three ends.",
    ]);

    let report = engine.translate(request(document)).await.unwrap();

    assert_eq!(report.status, JobStatus::CompletedWithFailures);
    assert_eq!(report.completed, vec![0, 2]);
    assert_eq!(report.failed.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(report.failed[&1].kind, ErrorKind::ProviderRefusal);
    assert!(report.skipped.is_empty());
    assert_eq!(mock.seam_count(), 0);

    let first = report.text.find("[fr] Page one starts.").unwrap();
    let middle = report.text.find("Page two starts.\npage two does not end").unwrap();
    let last = report.text.find("[fr] page three continues.").unwrap();
    assert!(first < middle && middle < last);
    assert!(report.text.contains("[fr] page one does not end\n\nPage two starts."));
}

/// Test that image pages are translated but never seam-repaired
#[tokio::test]
async fn test_pageJob_imagePages_shouldTranslateWithoutSeams() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);
    let document = Document::new(
        "scans",
        vec![
            TranslationUnit::image(0, vec![1u8, 2, 3], "image/png"),
            TranslationUnit::image(1, vec![4u8, 5, 6], "image/png"),
        ],
    );

    let report = engine.translate(request(document)).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.text, "[fr] image page 1\n\n[fr] image page 2");
    assert_eq!(mock.seam_count(), 0);
}

/// Test that disabling seam repair sends no repair calls
#[tokio::test]
async fn test_pageJob_seamRepairDisabled_shouldMakeNoRepairCalls() {
    let mock = MockTranslator::working();
    let mut config = common::test_config();
    config.seam.enabled = false;
    let engine = common::engine_with(config, &mock, common::memory_store());
    let document = common::pages(&["Alpha one.\nthe sentence breaks", "across the page.\nBeta ends."]);

    let report = engine.translate(request(document)).await.unwrap();

    assert_eq!(mock.seam_count(), 0);
    assert!(report.text.contains("[fr] the sentence breaks\n\n[fr] across the page."));
}

/// Test that an unusable repair answer keeps the original junction and warns
#[tokio::test]
async fn test_pageJob_unusableSeamReply_shouldKeepBoundaryAndWarn() {
    let mock = MockTranslator::working().with_seam_reply("no marker here");
    let engine = common::engine(&mock);
    let document = common::pages(&["Alpha one.\nthe sentence breaks", "across the page.\nBeta ends."]);

    let report = engine.translate(request(document)).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert!(report.text.contains("[fr] the sentence breaks\n\n[fr] across the page."));
    assert!(report.warnings.iter().any(|w| w.contains("Seam between pages 1 and 2")));
}

/// Test that assembly order is independent of completion order
#[tokio::test]
async fn test_pageJob_concurrentSlowCalls_shouldAssembleBySequence() {
    let mock = MockTranslator::slow(5);
    let engine = common::engine(&mock);
    let document = common::numbered_pages(8);

    let report = engine.translate(request(document).with_concurrency(8)).await.unwrap();

    let expected: Vec<String> = (1..=8).map(|i| format!("[fr] Page {}.", i)).collect();
    assert_eq!(report.text, expected.join("\n\n"));
    assert_eq!(mock.dispatched_set().len(), 8);
}

/// Test that the progress stream ends with the final state and never goes backwards
#[tokio::test]
async fn test_progressStream_wholeJob_shouldBeMonotonicAndEndCompleted() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);

    let handle = engine
        .start(request(common::numbered_pages(5)).with_concurrency(2))
        .await
        .unwrap();
    let collector = tokio::spawn(handle.progress_stream().collect::<Vec<_>>());
    let report = handle.result().await.unwrap();
    let snapshots = collector.await.unwrap();

    let last = snapshots.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.completed, 5);
    assert_eq!(last.total_units, 5);
    assert!((last.fraction() - 1.0).abs() < f64::EPSILON);
    assert!((last.cost_so_far - report.cost).abs() < 1e-12);
    assert!(snapshots.windows(2).all(|pair| pair[0].completed <= pair[1].completed
        && pair[0].tokens_used <= pair[1].tokens_used));
}
