/*!
 * # tinbox
 *
 * A library for translating long documents with large language models.
 *
 * ## Features
 *
 * - Two translation algorithms:
 *   - page by page, with repair of sentences broken across page boundaries
 *   - sliding window, with reconciliation of the overlapping spans
 * - Text and image pages
 * - Translation providers:
 *   - OpenAI API
 *   - Anthropic API
 *   - Ollama (local LLM)
 * - Cost estimation before a job and cost tracking during it
 * - Checkpoints after every unit, so interrupted jobs resume without re-billing
 * - Bounded concurrency, retries with backoff, cancellation
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `document`: Loading documents into translation units
 * - `translation`: The translation engine:
 *   - `translation::engine`: Jobs, progress and cancellation
 *   - `translation::page`: Page-by-page algorithm
 *   - `translation::window`: Sliding-window algorithm
 *   - `translation::cost`: Cost estimation and tracking
 * - `checkpoint`: Checkpoint persistence (JSON files or SQLite)
 * - `providers`: Client implementations for various LLM providers:
 *   - `providers::openai`: OpenAI API client
 *   - `providers::anthropic`: Anthropic API client
 *   - `providers::ollama`: Ollama API client
 * - `app_controller`: Wiring used by the command line tool
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language code utilities
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod checkpoint;
pub mod document;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::{Algorithm, Config, ModelSpec};
pub use checkpoint::{CheckpointRecord, CheckpointStore, JobStatus};
pub use document::Document;
pub use errors::{AppError, ErrorKind, ProviderError, TranslationError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use translation::{CancelSignal, CostEstimate, JobHandle, JobProgress, JobReport, JobRequest, TranslationEngine};
