/*!
 * Integration tests for the application controller from input file to output file
 */

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tinbox::app_config::{Config, ProviderConfig, TranslationProvider};
use tinbox::app_controller::{Controller, OutputFormat, TranslateOptions, OPTIONAL_CATEGORY};
use tinbox::checkpoint::CheckpointStore;
use tinbox::providers::mock::MockTranslator;
use tinbox::{CostEstimate, JobStatus};
use tokio_test;
use crate::common;

fn local_config() -> Config {
    let mut config = common::test_config();
    config.model = "ollama:llama3".to_string();
    config
}

fn paid_config() -> Config {
    let mut config = common::test_config();
    match config.providers.iter_mut().find(|p| p.provider == TranslationProvider::OpenAI) {
        Some(provider) => provider.api_key = "sk-test".to_string(),
        None => {
            let mut provider = ProviderConfig::new(TranslationProvider::OpenAI);
            provider.api_key = "sk-test".to_string();
            config.providers.push(provider);
        }
    }
    config
}

fn controller(config: Config, mock: &MockTranslator, store: Arc<dyn CheckpointStore>) -> Result<Controller> {
    common::init_logging();
    Ok(Controller::with_config(config)?
        .with_translator(Arc::new(mock.clone()))
        .with_store(store))
}

fn options(input: &Path) -> TranslateOptions {
    let mut options = TranslateOptions::new(input);
    options.show_progress = false;
    options
}

/// Test that JSON output carries the report next to the translation
#[tokio::test]
async fn test_run_jsonFormat_shouldWriteReport() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "letter.txt", "Dear reader.\u{000C}Kind regards.")?;
    let output = temp_dir.path().join("out").join("letter.json");
    let mock = MockTranslator::working();

    let mut opts = options(&input);
    opts.format = OutputFormat::Json;
    opts.output = Some(output.clone());
    let report = controller(local_config(), &mock, common::memory_store())?
        .run(opts)
        .await?
        .expect("not a dry run");

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&output)?)?;
    assert_eq!(value["job_id"], report.job_id.as_str());
    assert_eq!(value["document"], "letter.txt");
    assert_eq!(value["text"], "[fr] Dear reader.\n\n[fr] Kind regards.");
    assert_eq!(value["completed"], serde_json::json!([0, 1]));
    Ok(())
}

/// Test that markdown output lands next to the input with the target language in its name
#[tokio::test]
async fn test_run_markdownFormat_shouldUseGeneratedName() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "notes.txt", "First note.")?;
    let mock = MockTranslator::working();

    let mut opts = options(&input);
    opts.format = OutputFormat::Markdown;
    controller(local_config(), &mock, common::memory_store())?.run(opts).await?;

    let written = std::fs::read_to_string(temp_dir.path().join("notes.fr.md"))?;
    assert!(written.starts_with("# notes.txt (French)\n\n[fr] First note."));
    assert!(written.contains("- Units: 1/1 translated"));
    Ok(())
}

/// Test that an estimate above the cost limit stops the run before any call
#[tokio::test]
async fn test_run_estimateAboveMaxCost_shouldRefuseToStart() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "book.txt", &common::long_text(20_000))?;
    let mut config = paid_config();
    config.cost.max_cost = Some(0.0);
    let mock = MockTranslator::working();

    let err = controller(config, &mock, common::memory_store())?
        .run(options(&input))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("exceeds the limit"));
    assert_eq!(mock.request_count(), 0);
    assert!(!temp_dir.path().join("book.fr.txt").exists());
    Ok(())
}

/// Test that estimate warnings stop an unforced run when nobody can confirm
#[tokio::test]
async fn test_run_estimateWarningsWithoutForce_shouldNotStart() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "book.txt", "A short book.")?;
    let mut config = paid_config();
    config.cost.large_document_tokens = 1;
    let mock = MockTranslator::working();

    let err = controller(config, &mock, common::memory_store())?
        .run(options(&input))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("--force"));
    assert_eq!(mock.request_count(), 0);
    assert!(!temp_dir.path().join("book.fr.txt").exists());
    Ok(())
}

/// Test that --force skips the warning confirmation
#[tokio::test]
async fn test_run_estimateWarningsWithForce_shouldTranslate() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "book.txt", "A short book.")?;
    let mut config = paid_config();
    config.cost.large_document_tokens = 1;
    let mock = MockTranslator::working();

    let mut opts = options(&input);
    opts.force = true;
    let report = controller(config, &mock, common::memory_store())?
        .run(opts)
        .await?
        .expect("not a dry run");

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(std::fs::read_to_string(temp_dir.path().join("book.fr.txt"))?, "[fr] A short book.");
    Ok(())
}

/// Test that the confirmation answer decides whether a warned run starts
#[tokio::test]
async fn test_run_estimateWarnings_shouldFollowConfirmation() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "book.txt", "A short book.")?;
    let mut config = paid_config();
    config.cost.large_document_tokens = 1;

    let declined = MockTranslator::working();
    let err = controller(config.clone(), &declined, common::memory_store())?
        .with_confirmation(Arc::new(|estimate: &CostEstimate| estimate.warnings.is_empty()))
        .run(options(&input))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    assert_eq!(declined.request_count(), 0);

    let accepted = MockTranslator::working();
    let report = controller(config, &accepted, common::memory_store())?
        .with_confirmation(Arc::new(|estimate: &CostEstimate| !estimate.warnings.is_empty()))
        .run(options(&input))
        .await?
        .expect("not a dry run");
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(accepted.request_count(), 1);
    Ok(())
}

/// Test that doctor passes with a reachable model and a working store
#[tokio::test]
async fn test_doctor_workingModel_shouldPassRequiredChecks() {
    let mock = MockTranslator::working();
    let report = Controller::for_diagnostics(local_config())
        .with_translator(Arc::new(mock.clone()))
        .with_store(common::memory_store())
        .doctor()
        .await;

    assert!(report.required_ok());
    assert_eq!(report.check("configuration").map(|c| c.ok), Some(true));
    assert_eq!(report.check("model ollama:llama3").map(|c| c.ok), Some(true));
    assert_eq!(report.check("checkpoint store").map(|c| c.ok), Some(true));
    assert_eq!(report.checks.iter().filter(|c| c.category == OPTIONAL_CATEGORY).count(), 2);
    assert_eq!(mock.request_count(), 1);
}

/// Test that doctor reports a model rejecting its credentials
#[tokio::test]
async fn test_doctor_failingModel_shouldFailWithHint() {
    let report = Controller::for_diagnostics(local_config())
        .with_translator(Arc::new(MockTranslator::failing()))
        .with_store(common::memory_store())
        .doctor()
        .await;

    let model = report.check("model ollama:llama3").expect("model check");
    assert!(!model.ok);
    assert!(model.hint.as_deref().unwrap_or_default().contains("ollama serve"));
    assert!(!report.required_ok());
    assert!(!report.all_ok());
}

/// Test that doctor still reports on an invalid configuration
#[tokio::test]
async fn test_doctor_invalidConfig_shouldReportConfigurationFailure() {
    let mut config = local_config();
    config.target_language = "zz".to_string();
    assert!(Controller::with_config(config.clone()).is_err());

    let report = Controller::for_diagnostics(config)
        .with_translator(Arc::new(MockTranslator::working()))
        .with_store(common::memory_store())
        .doctor()
        .await;

    assert_eq!(report.check("configuration").map(|c| c.ok), Some(false));
    assert_eq!(report.check("checkpoint store").map(|c| c.ok), Some(true));
    assert!(!report.required_ok());
}

/// Test that a dry run only estimates
#[tokio::test]
async fn test_run_dryRun_shouldLeaveNoCheckpoint() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "doc.txt", "Hello there.")?;
    let mock = MockTranslator::working();
    let controller = controller(local_config(), &mock, common::memory_store())?;

    let mut opts = options(&input);
    opts.dry_run = true;
    assert!(controller.run(opts).await?.is_none());
    assert_eq!(mock.request_count(), 0);
    assert!(controller.list_checkpoints().await?.is_empty());
    Ok(())
}

/// Test failing a page, then resuming it through the controller into the same output file
#[tokio::test]
async fn test_run_resumeAfterFailure_shouldCompleteOutput() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(
        temp_dir.path(),
        "story.txt",
        "Once upon a time.\u{000C}The end came.\u{000C}Goodbye.",
    )?;
    let output = temp_dir.path().join("story.fr.txt");
    let store = common::memory_store();

    let refusing = MockTranslator::working().refusing([1]);
    let first = controller(local_config(), &refusing, store.clone())?
        .run(options(&input))
        .await?
        .expect("not a dry run");
    assert_eq!(first.status, JobStatus::CompletedWithFailures);
    assert!(std::fs::read_to_string(&output)?.contains("\n\nThe end came.\n\n"));

    let working = MockTranslator::working();
    let controller = controller(local_config(), &working, store)?;
    let mut opts = options(&input);
    opts.resume = Some(first.job_id.clone());
    opts.force_overwrite = true;
    let resumed = controller.run(opts).await?.expect("not a dry run");

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(working.dispatched(), vec![1]);
    assert_eq!(
        std::fs::read_to_string(&output)?,
        "[fr] Once upon a time.\n\n[fr] The end came.\n\n[fr] Goodbye."
    );

    let checkpoints = controller.list_checkpoints().await?;
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].job_id, first.job_id);
    assert_eq!(checkpoints[0].status, JobStatus::Completed);
    Ok(())
}

/// Test estimating through the controller on a fresh store
#[test]
fn test_estimate_textFile_shouldNotTouchStore() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let input = common::create_test_file(temp_dir.path(), "essay.txt", "One page.\u{000C}Two pages.")?;
    let mock = MockTranslator::working();
    let controller = controller(local_config(), &mock, common::memory_store())?;

    let estimate = controller.estimate(&input, tinbox::Algorithm::Page)?;
    assert_eq!(estimate.per_unit_breakdown.len(), 2);
    assert_eq!(estimate.estimated_cost, 0.0);
    assert_eq!(mock.request_count(), 0);

    let checkpoints = tokio_test::block_on(controller.list_checkpoints())?;
    assert!(checkpoints.is_empty());
    Ok(())
}
