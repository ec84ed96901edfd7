/*!
 * Integration tests for sliding-window translation jobs
 */

use tinbox::app_config::{Algorithm, Config};
use tinbox::document::Document;
use tinbox::providers::mock::MockTranslator;
use tinbox::{JobRequest, JobStatus, TranslationError};
use crate::common;

fn window_config(context_passing: bool) -> Config {
    let mut config = common::test_config();
    config.window.size = 4000;
    config.window.overlap = 500;
    config.window.context_passing = context_passing;
    config
}

fn request(document: Document) -> JobRequest {
    JobRequest::new(document, "en", "fr", Algorithm::SlidingWindow)
}

/// Test the ten thousand character scenario through the engine
#[tokio::test]
async fn test_windowJob_tenThousandChars_shouldTranslateThreeWindows() {
    let text = common::long_text(10_000);
    let mock = MockTranslator::working();
    let engine = common::engine_with(window_config(false), &mock, common::memory_store());

    let report = engine
        .translate(request(Document::from_pages("long", vec![text.clone()])).with_concurrency(3))
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.total_units, 3);
    assert_eq!(report.completed, vec![0, 1, 2]);
    assert_eq!(mock.dispatched_set().len(), 3);

    // Each window comes back as "[fr] " + window text
    let sum_of_windows = (4000 + 5) + (4000 + 5) + (3000 + 5);
    assert!(report.text.len() <= sum_of_windows);
    assert!(report.text.starts_with("[fr] word0 word1 "));
    assert!(report.text.ends_with(&text[9_900..]));
}

/// Test that context passing sends the preceding source text and runs windows in order
#[tokio::test]
async fn test_windowJob_contextPassing_shouldRunSequentiallyWithSourceContext() {
    let text = common::long_text(10_000);
    let mock = MockTranslator::working();
    let engine = common::engine_with(window_config(true), &mock, common::memory_store());

    engine
        .translate(request(Document::from_pages("long", vec![text.clone()])).with_concurrency(4))
        .await
        .unwrap();

    assert_eq!(mock.dispatched(), vec![0, 1, 2]);
    let contexts = mock.contexts();
    assert_eq!(contexts[0], None);
    assert_eq!(contexts[1].as_deref(), Some(&text[3_200..3_500]));
    assert_eq!(contexts[2].as_deref(), Some(&text[6_700..7_000]));
}

/// Test that a short text becomes a single window with no reconciliation
#[tokio::test]
async fn test_windowJob_shortText_shouldBeSingleWindow() {
    let mock = MockTranslator::working();
    let engine = common::engine_with(window_config(true), &mock, common::memory_store());

    let report = engine
        .translate(request(common::pages(&["Short page one.", "Short page two."])))
        .await
        .unwrap();

    assert_eq!(report.total_units, 1);
    assert_eq!(report.text, "[fr] Short page one.\n\n[fr] Short page two.");
    assert!(report.warnings.is_empty());
}

/// Test that window sizes may be given in estimated tokens
#[tokio::test]
async fn test_windowJob_tokenMeasure_shouldScaleWindows() {
    let mut config = window_config(false);
    config.window.measure = tinbox::app_config::WindowMeasure::Tokens;
    config.window.size = 1000;
    config.window.overlap = 125;
    let mock = MockTranslator::working();
    let engine = common::engine_with(config, &mock, common::memory_store());

    let estimate = engine
        .estimate(&Document::from_pages("long", vec![common::long_text(10_000)]), Algorithm::SlidingWindow, "en", "fr")
        .unwrap();

    assert_eq!(estimate.per_unit_breakdown.len(), 3);
    assert_eq!(mock.request_count(), 0);
}

/// Test that image documents cannot be windowed and nothing is sent
#[tokio::test]
async fn test_windowJob_imageDocument_shouldFailBeforeAnyCall() {
    let mock = MockTranslator::working();
    let engine = common::engine_with(window_config(false), &mock, common::memory_store());
    let document = Document::new(
        "scan",
        vec![tinbox::translation::unit::TranslationUnit::image(0, vec![9u8], "image/png")],
    );

    let err = engine.start(request(document)).await.unwrap_err();

    assert!(matches!(err, TranslationError::Segmentation(_)));
    assert_eq!(mock.request_count(), 0);
}
