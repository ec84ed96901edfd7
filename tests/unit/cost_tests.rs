/*!
 * Tests for pre-flight cost estimation and the cost ledger
 */

use tinbox::app_config::{Algorithm, ModelSpec};
use tinbox::document::Document;
use tinbox::providers::mock::MockTranslator;
use tinbox::translation::cost::{CostEstimator, CostLedger, CostLevel, ModelPrice, PriceTable};
use tinbox::translation::unit::{TokenUsage, TranslationUnit};
use tinbox::TranslationError;
use crate::common;

/// Test that the estimate is a pure function of the document
#[test]
fn test_estimate_calledTwice_shouldBeIdenticalAndMakeNoCalls() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);
    let document = common::numbered_pages(12);

    let first = engine.estimate(&document, Algorithm::Page, "en", "fr").unwrap();
    let second = engine.estimate(&document, Algorithm::Page, "en", "fr").unwrap();

    assert_eq!(first, second);
    assert_eq!(first.per_unit_breakdown.len(), 12);
    assert!(first.estimated_cost > 0.0);
    assert_eq!(first.cost_level, CostLevel::Low);
    assert_eq!(mock.request_count(), 0);
}

/// Test that overlapping windows cost more than the flat text they cover
#[test]
fn test_estimate_slidingWindow_shouldCountOverlapTwice() {
    let mock = MockTranslator::working();
    let mut config = common::test_config();
    config.window.size = 4000;
    config.window.overlap = 500;
    let engine = common::engine_with(config, &mock, common::memory_store());
    let document = Document::from_pages("long", vec![common::long_text(10_000)]);

    let paged = engine.estimate(&document, Algorithm::Page, "en", "fr").unwrap();
    let windowed = engine.estimate(&document, Algorithm::SlidingWindow, "en", "fr").unwrap();

    assert_eq!(paged.per_unit_breakdown.len(), 1);
    assert_eq!(windowed.per_unit_breakdown.len(), 3);
    let paged_input: u64 = paged.per_unit_breakdown.iter().map(|u| u.tokens.input).sum();
    let windowed_input: u64 = windowed.per_unit_breakdown.iter().map(|u| u.tokens.input).sum();
    assert!(windowed_input > paged_input);
    assert_eq!(mock.request_count(), 0);
}

/// Test that a document the algorithm cannot split is rejected before any estimate
#[test]
fn test_estimate_slidingWindowOverImages_shouldBeSegmentationError() {
    let mock = MockTranslator::working();
    let engine = common::engine(&mock);
    let document = Document::new(
        "scans",
        vec![
            TranslationUnit::image(0, vec![1u8, 2, 3], "image/png"),
            TranslationUnit::image(1, vec![4u8, 5, 6], "image/png"),
        ],
    );

    let err = engine
        .estimate(&document, Algorithm::SlidingWindow, "en", "fr")
        .unwrap_err();
    assert!(matches!(err, TranslationError::Segmentation(_)));

    let paged = engine.estimate(&document, Algorithm::Page, "en", "fr").unwrap();
    assert_eq!(paged.per_unit_breakdown.len(), 2);
}

/// Test the large document and threshold warnings
#[test]
fn test_estimate_largeDocumentOverBudget_shouldWarnTwice() {
    let mock = MockTranslator::working();
    let mut config = common::test_config();
    config.cost.large_document_tokens = 100;
    config.cost.max_cost = Some(0.000001);
    let engine = common::engine_with(config, &mock, common::memory_store());

    let estimate = engine
        .estimate(&common::numbered_pages(10), Algorithm::Page, "en", "fr")
        .unwrap();
    assert_eq!(estimate.warnings.len(), 2);
    assert!(estimate.warnings[0].contains("Large document"));
    assert!(estimate.warnings[1].contains("exceeds maximum"));
}

/// Test that local models are estimated as free without warnings
#[test]
fn test_estimate_localModel_shouldBeFree() {
    let mock = MockTranslator::working();
    let mut config = common::test_config();
    config.model = "ollama:llama3".to_string();
    config.cost.large_document_tokens = 1;
    let engine = common::engine_with(config, &mock, common::memory_store());

    let estimate = engine
        .estimate(&common::numbered_pages(3), Algorithm::Page, "en", "fr")
        .unwrap();
    assert_eq!(estimate.estimated_cost, 0.0);
    assert!(estimate.warnings.is_empty());
    assert!(estimate.estimated_tokens > 0);
}

/// Test that estimation works from configuration alone
#[test]
fn test_estimator_withCustomPrice_shouldUseIt() {
    let mut config = common::test_config().cost;
    config.prices = vec![ModelPrice::new("house-model", 10.0, 20.0)];
    let estimator = CostEstimator::new(config);
    let spec = ModelSpec::parse("openai:house-model-v2").unwrap();

    let units = vec![TranslationUnit::text(0, "x".repeat(4 * 940))];
    let estimate = estimator.estimate(&units, &spec, "en", "fr");

    // 940 content tokens + 60 prompt overhead, output mirrors input
    assert_eq!(estimate.estimated_tokens, 2000);
    assert!((estimate.estimated_cost - 0.03).abs() < 1e-9);
    assert_eq!(estimator.price_table().price_for(&spec).model, "house-model");
}

/// Test that actual tracking uses the price table, not the heuristic
#[test]
fn test_ledger_withRealUsage_shouldUseModelPrice() {
    let table = PriceTable::default();
    let price = table.price_for(&ModelSpec::parse("openai:gpt-4o-mini").unwrap());
    let mut ledger = CostLedger::new();

    ledger.append(TokenUsage::new(2_000_000, 0), &price);
    ledger.append(TokenUsage::new(0, 1_000_000), &price);

    assert_eq!(ledger.tokens, TokenUsage::new(2_000_000, 1_000_000));
    assert_eq!(ledger.total_tokens(), 3_000_000);
    assert!((ledger.cost - (0.30 + 0.60)).abs() < 1e-9);
}
