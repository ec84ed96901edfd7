/*!
 * Common test utilities for the tinbox test suite
 */

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use tinbox::app_config::Config;
use tinbox::checkpoint::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore};
use tinbox::document::Document;
use tinbox::providers::mock::MockTranslator;
use tinbox::translation::TranslationEngine;

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Configuration for tests: priced model, French target, no retry delays
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.model = "openai:gpt-4o-mini".to_string();
    config.target_language = "fr".to_string();
    config.translation.retry.base_backoff_ms = 0;
    config.translation.retry.max_backoff_ms = 0;
    config.translation.retry.jitter = false;
    config
}

/// In-memory SQLite checkpoint store
pub fn memory_store() -> Arc<dyn CheckpointStore> {
    Arc::new(SqliteCheckpointStore::new_in_memory().expect("in-memory store"))
}

/// File checkpoint store in `dir`
pub fn file_store(dir: &Path) -> Arc<FileCheckpointStore> {
    Arc::new(FileCheckpointStore::new(dir).expect("file store"))
}

/// Route library logs to the test output; set RUST_LOG to see them
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine over a mock translator
pub fn engine_with(config: Config, translator: &MockTranslator, store: Arc<dyn CheckpointStore>) -> TranslationEngine {
    init_logging();
    TranslationEngine::new(config, Arc::new(translator.clone()), store).expect("engine")
}

/// Engine with the test configuration and an in-memory store
pub fn engine(translator: &MockTranslator) -> TranslationEngine {
    engine_with(test_config(), translator, memory_store())
}

/// Text document with one page per entry
pub fn pages(texts: &[&str]) -> Document {
    Document::from_pages("test", texts.iter().map(|t| t.to_string()).collect())
}

/// Single-line pages "Page 1.", "Page 2.", ...
pub fn numbered_pages(count: usize) -> Document {
    Document::from_pages("test", (1..=count).map(|i| format!("Page {}.", i)).collect())
}

/// ASCII text of exactly `chars` characters made of distinct words
pub fn long_text(chars: usize) -> String {
    let mut text = String::with_capacity(chars + 16);
    let mut i = 0;
    while text.len() < chars {
        text.push_str(&format!("word{} ", i));
        i += 1;
    }
    text.truncate(chars);
    text
}
