use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_config::{Algorithm, Config, TranslationProvider};
use crate::checkpoint::{open_store, CheckpointRecord, CheckpointStore, JobStatus};
use crate::document::Document;
use crate::file_utils::FileManager;
use crate::language_utils;
use crate::providers::{create_translator, ModelInterface};
use crate::translation::{CancelSignal, CostEstimate, JobReport, JobRequest, TranslationEngine};

// @module: Application controller wiring documents, engine and output

/// Output format of a translated document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// Options of one translate run, already merged with the configuration defaults
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub algorithm: Algorithm,
    pub concurrency: Option<usize>,
    pub resume: Option<String>,
    pub dry_run: bool,
    pub format: OutputFormat,
    pub force_overwrite: bool,
    /// Proceed despite estimate warnings without asking
    pub force: bool,
    pub show_progress: bool,
}

impl TranslateOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            algorithm: Algorithm::default(),
            concurrency: None,
            resume: None,
            dry_run: false,
            format: OutputFormat::default(),
            force_overwrite: false,
            force: false,
            show_progress: true,
        }
    }
}

/// Asked whether to go on when the estimate carries warnings
pub type Confirmation = Arc<dyn Fn(&CostEstimate) -> bool + Send + Sync>;

/// Category of checks that may fail without making the installation unusable
pub const OPTIONAL_CATEGORY: &str = "API Keys";

/// One environment check reported by `Controller::doctor`
#[derive(Debug, Clone, PartialEq)]
pub struct DoctorCheck {
    pub name: String,
    pub category: &'static str,
    pub ok: bool,
    pub details: String,
    pub hint: Option<String>,
}

impl DoctorCheck {
    fn passed(category: &'static str, name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            ok: true,
            details: details.into(),
            hint: None,
        }
    }

    fn failed(category: &'static str, name: impl Into<String>, details: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            ok: false,
            details: details.into(),
            hint: Some(hint.into()),
        }
    }
}

/// Outcome of all environment checks
#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    /// Every check outside the optional categories passed
    pub fn required_ok(&self) -> bool {
        self.checks.iter().filter(|c| c.category != OPTIONAL_CATEGORY).all(|c| c.ok)
    }

    pub fn check(&self, name: &str) -> Option<&DoctorCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Main application controller for document translation
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Translator override, resolved from the model spec when absent
    translator: Option<Arc<dyn ModelInterface>>,
    // @field: Checkpoint store override, opened from the config when absent
    store: Option<Arc<dyn CheckpointStore>>,
    // @field: Prompt used when the estimate has warnings and the run is not forced
    confirmation: Option<Confirmation>,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    document: &'a str,
    source_language: &'a str,
    target_language: &'a str,
    model: &'a str,
    #[serde(flatten)]
    report: &'a JobReport,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;
        Ok(Self::for_diagnostics(config))
    }

    /// Create a controller without validating the configuration, for `doctor`
    pub fn for_diagnostics(config: Config) -> Self {
        Self {
            config,
            translator: None,
            store: None,
            confirmation: None,
        }
    }

    /// Use this translator instead of the configured provider
    pub fn with_translator(mut self, translator: Arc<dyn ModelInterface>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Use this checkpoint store instead of the configured one
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Ask this callback before translating when the estimate has warnings
    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn store(&self) -> Result<Arc<dyn CheckpointStore>> {
        match &self.store {
            Some(store) => Ok(store.clone()),
            None => Ok(open_store(&self.config.checkpoint)?),
        }
    }

    fn engine(&self) -> Result<TranslationEngine> {
        let translator = match &self.translator {
            Some(translator) => translator.clone(),
            None => create_translator(&self.config.model_spec()?, &self.config)?,
        };
        Ok(TranslationEngine::new(self.config.clone(), translator, self.store()?)?)
    }

    /// Estimate tokens and cost for a document without calling the model
    pub fn estimate(&self, input: &Path, algorithm: Algorithm) -> Result<CostEstimate> {
        let document = Document::load(input)?;
        let estimate = self.engine()?.estimate(
            &document,
            algorithm,
            &self.config.source_language,
            &self.config.target_language,
        )?;
        Ok(estimate)
    }

    /// Translate one document; returns `None` for a dry run
    pub async fn run(&self, options: TranslateOptions) -> Result<Option<JobReport>> {
        let document = Document::load(&options.input)?;
        let engine = self.engine()?;
        let source_lang = self.config.source_language.clone();
        let target_lang = self.config.target_language.clone();

        info!(
            "tinbox: {} ({} page(s)) {} -> {} with {}",
            document.name,
            document.page_count(),
            language_utils::display_name(&source_lang),
            language_utils::display_name(&target_lang),
            engine.model()
        );

        let estimate = engine.estimate(&document, options.algorithm, &source_lang, &target_lang)?;
        log_estimate(&estimate);
        if options.dry_run {
            return Ok(None);
        }
        if options.resume.is_none() {
            if let Some(max_cost) = self.config.cost.max_cost {
                if estimate.estimated_cost > max_cost {
                    return Err(anyhow!(
                        "Estimated cost ${:.4} exceeds the limit of ${:.2}",
                        estimate.estimated_cost,
                        max_cost
                    ));
                }
            }
        }
        if !estimate.warnings.is_empty() && !options.force {
            let confirmed = match &self.confirmation {
                Some(confirm) => {
                    let confirm = confirm.clone();
                    let estimate = estimate.clone();
                    tokio::task::spawn_blocking(move || confirm(&estimate))
                        .await
                        .context("Confirmation prompt failed")?
                }
                None => {
                    return Err(anyhow!(
                        "Estimate has {} warning(s). Use --force to proceed anyway.",
                        estimate.warnings.len()
                    ))
                }
            };
            if !confirmed {
                return Err(anyhow!("Translation cancelled"));
            }
        }

        let output_path = options.output.clone().unwrap_or_else(|| {
            let dir = options.input.parent().unwrap_or(Path::new("."));
            FileManager::generate_output_path(&options.input, dir, &target_lang, options.format.extension())
        });
        if FileManager::file_exists(&output_path) && !options.force_overwrite {
            return Err(anyhow!(
                "Output file already exists: {:?}. Use -f to force overwrite.",
                output_path
            ));
        }

        let cancel = CancelSignal::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing in-flight units before stopping");
                    cancel.cancel();
                }
            })
        };

        let mut request = JobRequest::new(document.clone(), &source_lang, &target_lang, options.algorithm)
            .with_cancel_signal(cancel);
        request.concurrency = options.concurrency;
        request.resume_from = options.resume.clone();

        let handle = engine.start(request).await?;
        let job_id = handle.job_id().to_string();
        info!("Job {}", job_id);

        let progress_bar = if options.show_progress {
            ProgressBar::new(handle.progress().total_units as u64)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units ({percent}%) {msg} {eta}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));

        let progress_task = {
            let progress_bar = progress_bar.clone();
            let mut stream = Box::pin(handle.progress_stream());
            tokio::spawn(async move {
                while let Some(progress) = stream.next().await {
                    progress_bar.set_position((progress.completed + progress.failed) as u64);
                    progress_bar.set_message(format!("{} tokens, ${:.4}", progress.tokens_used, progress.cost_so_far));
                }
            })
        };

        let result = handle.result().await;
        interrupt.abort();
        join_progress(progress_task).await;
        progress_bar.finish_and_clear();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                info!("Resume with --resume {}", job_id);
                return Err(e.into());
            }
        };

        for warning in &report.warnings {
            warn!("{}", warning);
        }
        for (index, failure) in &report.failed {
            warn!("Unit {} not translated ({}): {}", index + 1, failure.kind.as_str(), failure.message);
        }

        if report.status == JobStatus::Cancelled {
            warn!(
                "Job cancelled after {}/{} unit(s). Resume with --resume {}",
                report.completed.len(),
                report.total_units,
                report.job_id
            );
            return Ok(Some(report));
        }

        let rendered = render_report(&report, &document.name, &source_lang, &target_lang, &engine.model().full_name(), options.format)?;
        FileManager::write_to_file(&output_path, &rendered)?;

        info!(
            "{}: {} in {} ({} tokens, ${:.4})",
            report.status,
            output_path.display(),
            Self::format_duration(report.elapsed),
            report.tokens_used.total(),
            report.cost
        );
        if report.status == JobStatus::CompletedWithFailures {
            info!("Retry failed units with --resume {}", report.job_id);
        }
        Ok(Some(report))
    }

    /// Stored checkpoints, newest first
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        let store = self.store()?;
        let mut records = Vec::new();
        for job_id in store.list().await? {
            match store.load(&job_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping checkpoint {}: {}", job_id, e),
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    /// Check configuration, credentials, model reachability and checkpoint storage
    pub async fn doctor(&self) -> DoctorReport {
        let mut checks = Vec::new();

        checks.push(match self.config.validate() {
            Ok(()) => DoctorCheck::passed("Configuration", "configuration", "valid"),
            Err(e) => DoctorCheck::failed("Configuration", "configuration", format!("{:#}", e), "Fix or delete the config file"),
        });

        for provider in [TranslationProvider::OpenAI, TranslationProvider::Anthropic] {
            let name = format!("{} API key", provider.display_name());
            let key = self.config.provider_config(provider).resolved_api_key();
            checks.push(if key.is_empty() {
                DoctorCheck::failed(
                    OPTIONAL_CATEGORY,
                    name,
                    "not set",
                    format!("Set {} or add api_key for {} in the config", key_variable(provider), provider),
                )
            } else {
                DoctorCheck::passed(OPTIONAL_CATEGORY, name, mask_key(&key))
            });
        }

        checks.push(self.model_check().await);

        checks.push(match self.list_checkpoints().await {
            Ok(records) => DoctorCheck::passed("Checkpoints", "checkpoint store", format!("{} checkpoint(s) stored", records.len())),
            Err(e) => DoctorCheck::failed(
                "Checkpoints",
                "checkpoint store",
                format!("{:#}", e),
                "Check the checkpoint directory or database path",
            ),
        });

        DoctorReport { checks }
    }

    async fn model_check(&self) -> DoctorCheck {
        const CATEGORY: &str = "Model";
        let spec = match self.config.model_spec() {
            Ok(spec) => spec,
            Err(e) => return DoctorCheck::failed(CATEGORY, "model", e.to_string(), "Use --model provider:model"),
        };
        let name = format!("model {}", spec.full_name());
        let translator = match &self.translator {
            Some(translator) => translator.clone(),
            None => {
                if !spec.provider.is_local() && self.config.provider_config(spec.provider).resolved_api_key().is_empty() {
                    return DoctorCheck::failed(
                        CATEGORY,
                        name,
                        "no API key",
                        format!("Set {}", key_variable(spec.provider)),
                    );
                }
                match create_translator(&spec, &self.config) {
                    Ok(translator) => translator,
                    Err(e) => return DoctorCheck::failed(CATEGORY, name, e.to_string(), "Check the provider settings"),
                }
            }
        };
        match translator.validate().await {
            Ok(()) => DoctorCheck::passed(CATEGORY, name, "reachable"),
            Err(e) => {
                let hint = match spec.provider {
                    TranslationProvider::Ollama => "Start the server with 'ollama serve'".to_string(),
                    provider => format!("Check {} and the endpoint", key_variable(provider)),
                };
                DoctorCheck::failed(CATEGORY, name, e.to_string(), hint)
            }
        }
    }

    // Format duration in a human-readable format
    fn format_duration(duration: std::time::Duration) -> String {
        let total_seconds = duration.as_secs();
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}.{:03}s", seconds, duration.subsec_millis())
        }
    }
}

/// Wait for the progress display task; false if it panicked or was aborted
async fn join_progress(task: tokio::task::JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Progress display stopped early: {}", e);
            false
        }
    }
}

fn key_variable(provider: TranslationProvider) -> &'static str {
    provider.api_key_variable().unwrap_or("the provider endpoint")
}

/// Show the first 8 and last 4 characters of a key
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn log_estimate(estimate: &CostEstimate) {
    info!(
        "Estimate: {} tokens, ${:.4} ({} cost), about {}",
        estimate.estimated_tokens,
        estimate.estimated_cost,
        estimate.cost_level,
        Controller::format_duration(estimate.estimated_time)
    );
    for warning in &estimate.warnings {
        warn!("{}", warning);
    }
}

/// Render a finished job in the requested format
pub fn render_report(
    report: &JobReport,
    document: &str,
    source_language: &str,
    target_language: &str,
    model: &str,
    format: OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(report.text.clone()),
        OutputFormat::Json => {
            let output = JsonOutput {
                document,
                source_language,
                target_language,
                model,
                report,
            };
            serde_json::to_string_pretty(&output).context("Failed to serialize report")
        }
        OutputFormat::Markdown => {
            let mut out = format!(
                "# {} ({})\n\n{}\n\n---\n\n",
                document,
                language_utils::display_name(target_language),
                report.text.trim_end()
            );
            out.push_str(&format!(
                "- Source language: {}\n",
                language_utils::display_name(source_language)
            ));
            out.push_str(&format!("- Model: {}\n", model));
            out.push_str(&format!(
                "- Units: {}/{} translated\n",
                report.completed.len(),
                report.total_units
            ));
            out.push_str(&format!(
                "- Tokens: {} (cost ${:.4})\n",
                report.tokens_used.total(),
                report.cost
            ));
            for warning in &report.warnings {
                out.push_str(&format!("- Warning: {}\n", warning));
            }
            Ok(out)
        }
    }
}
