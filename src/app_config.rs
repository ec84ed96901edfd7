use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::language_utils::{get_language_name, language_codes_match, AUTO_DETECT};
use crate::translation::cost::{default_price_table, ModelPrice};

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO), or `auto`
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Model specification in `provider:model` form
    #[serde(default = "default_model_spec")]
    pub model: String,

    /// Segmentation algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Per-call and dispatch settings
    #[serde(default)]
    pub translation: TranslationSettings,

    /// Sliding-window geometry and reconciliation thresholds
    #[serde(default)]
    pub window: WindowConfig,

    /// Page seam repair settings
    #[serde(default)]
    pub seam: SeamConfig,

    /// Pricing and estimation settings
    #[serde(default)]
    pub cost: CostConfig,

    /// Checkpoint persistence settings
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Provider connection settings
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: OpenAI
    #[default]
    OpenAI,
    // @provider: Anthropic
    Anthropic,
    // @provider: Ollama
    Ollama,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Ollama => "Ollama",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::Ollama => "ollama".to_string(),
        }
    }

    // @returns: Whether calls are billed
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Ollama)
    }

    // @returns: Environment variable holding the API key, if the provider needs one
    pub fn api_key_variable(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Ollama => None,
        }
    }

    pub fn all() -> [TranslationProvider; 3] {
        [Self::OpenAI, Self::Anthropic, Self::Ollama]
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(anyhow!(
                "Unknown model provider: {}. Supported providers: openai, anthropic, ollama",
                s
            )),
        }
    }
}

/// A parsed `provider:model` specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: TranslationProvider,
    pub model: String,
}

impl ModelSpec {
    /// Parse a specification such as `openai:gpt-4o` or `ollama:mistral-small:latest`
    pub fn parse(spec: &str) -> Result<Self> {
        let (provider, model) = spec.split_once(':').ok_or_else(|| {
            anyhow!(
                "Invalid model specification '{}'. Use format 'provider:model' \
                 (e.g., 'openai:gpt-4o', 'anthropic:claude-3-5-sonnet-latest', 'ollama:mistral-small')",
                spec
            )
        })?;
        let model = model.trim();
        if model.is_empty() {
            return Err(anyhow!("Model name is missing in specification '{}'", spec));
        }
        Ok(Self {
            provider: provider.trim().parse()?,
            model: model.to_string(),
        })
    }

    /// Canonical `provider:model` form
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

impl std::str::FromStr for ModelSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Document segmentation strategy
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Algorithm {
    /// Translate each page independently and repair the seams
    #[default]
    #[serde(rename = "page")]
    Page,
    /// Translate overlapping windows of flat text and reconcile the overlaps
    #[serde(rename = "sliding-window")]
    SlidingWindow,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::SlidingWindow => "sliding-window",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "page" => Ok(Self::Page),
            "sliding-window" | "sliding_window" | "window" => Ok(Self::SlidingWindow),
            _ => Err(anyhow!("Unknown algorithm: {}. Use 'page' or 'sliding-window'", s)),
        }
    }
}

/// Reasoning effort for models that support it
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Output verbosity for models that support it
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Low,
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Provider connection configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider identifier
    #[serde(rename = "type")]
    pub provider: TranslationProvider,

    // @field: API key (falls back to the provider's environment variable)
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Timeout seconds per call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Output token cap per call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl ProviderConfig {
    // @param provider: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider: TranslationProvider) -> Self {
        Self {
            provider,
            api_key: String::new(),
            endpoint: default_endpoint(provider),
            timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
        }
    }

    /// API key from the config, or from the provider's environment variable
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        self.provider
            .api_key_variable()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default()
    }

    /// Endpoint from the config, or the provider default
    pub fn resolved_endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            default_endpoint(self.provider)
        } else {
            self.endpoint.clone()
        }
    }
}

/// Retry policy settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound for a single backoff
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Add up to 25% random jitter to each backoff
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: true,
        }
    }
}

/// Translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationSettings {
    /// System prompt template
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum concurrent unit calls
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retry policy for transient provider errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Temperature (omitted for model families that reject it)
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,

    /// Nucleus sampling (omitted for model families that reject it)
    #[serde(default)]
    pub top_p: Option<f32>,

    /// Reasoning effort (ignored by models without reasoning controls)
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,

    /// Verbosity (ignored by models without verbosity controls)
    #[serde(default)]
    pub verbosity: Verbosity,

    /// Abort the job on the first failed unit
    #[serde(default)]
    pub fail_fast: bool,

    /// Split a truncated text unit and translate the halves
    #[serde(default = "default_true")]
    pub resegment_on_truncation: bool,

    /// How many times a unit may be halved
    #[serde(default = "default_max_resegment_depth")]
    pub max_resegment_depth: u32,

    /// Re-send a refused unit once with a reinforced prompt
    #[serde(default = "default_true")]
    pub refusal_retry: bool,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
            temperature: default_temperature(),
            top_p: None,
            reasoning_effort: ReasoningEffort::default(),
            verbosity: Verbosity::default(),
            fail_fast: false,
            resegment_on_truncation: true,
            max_resegment_depth: default_max_resegment_depth(),
            refusal_retry: true,
        }
    }
}

/// Unit in which window sizes are measured
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowMeasure {
    #[default]
    Characters,
    Tokens,
}

/// Sliding-window configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WindowConfig {
    /// Maximum window size, in `measure` units
    #[serde(default = "default_window_size")]
    pub size: usize,

    /// Overlap between consecutive windows, in `measure` units
    #[serde(default = "default_window_overlap")]
    pub overlap: usize,

    /// Characters or estimated tokens
    #[serde(default)]
    pub measure: WindowMeasure,

    /// Send the tail of the previous window's source as context (forces sequential dispatch)
    #[serde(default = "default_true")]
    pub context_passing: bool,

    /// Characters of previous source text passed as context
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,

    /// Minimum overlap match accepted as confident, in characters
    #[serde(default = "default_min_match_chars")]
    pub min_match_chars: usize,

    /// Share of equal words required for an approximate overlap match
    #[serde(default = "default_approximate_match_ratio")]
    pub approximate_match_ratio: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: default_window_size(),
            overlap: default_window_overlap(),
            measure: WindowMeasure::default(),
            context_passing: true,
            context_chars: default_context_chars(),
            min_match_chars: default_min_match_chars(),
            approximate_match_ratio: default_approximate_match_ratio(),
        }
    }
}

/// Page seam repair configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeamConfig {
    /// Whether seams between pages are repaired at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lines taken from each side of a seam
    #[serde(default = "default_seam_context_lines")]
    pub context_lines: usize,

    /// Only repair seams whose left side does not end a sentence
    #[serde(default = "default_true")]
    pub only_broken_boundaries: bool,
}

impl Default for SeamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_lines: default_seam_context_lines(),
            only_broken_boundaries: true,
        }
    }
}

/// Output/input length ratio for a language pair
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExpansionRatio {
    pub source_language: String,
    pub target_language: String,
    pub ratio: f64,
}

/// Cost estimation configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CostConfig {
    /// Warn when the estimate exceeds this amount (USD)
    #[serde(default)]
    pub max_cost: Option<f64>,

    /// Default output/input token ratio
    #[serde(default = "default_expansion_ratio")]
    pub expansion_ratio: f64,

    /// Per language pair overrides of `expansion_ratio`
    #[serde(default)]
    pub pair_ratios: Vec<ExpansionRatio>,

    /// Token count above which a paid run gets a size warning
    #[serde(default = "default_large_document_tokens")]
    pub large_document_tokens: u64,

    /// Estimated input tokens per image page
    #[serde(default = "default_image_tokens_per_page")]
    pub image_tokens_per_page: u64,

    /// Characters per estimated token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Per-model prices (per million tokens)
    #[serde(default = "default_price_table")]
    pub prices: Vec<ModelPrice>,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_cost: None,
            expansion_ratio: default_expansion_ratio(),
            pair_ratios: Vec::new(),
            large_document_tokens: default_large_document_tokens(),
            image_tokens_per_page: default_image_tokens_per_page(),
            chars_per_token: default_chars_per_token(),
            prices: default_price_table(),
        }
    }
}

impl CostConfig {
    /// Expansion ratio for a language pair, falling back to the default
    pub fn ratio_for(&self, source_language: &str, target_language: &str) -> f64 {
        self.pair_ratios
            .iter()
            .find(|r| {
                language_codes_match(&r.source_language, source_language)
                    && language_codes_match(&r.target_language, target_language)
            })
            .map(|r| r.ratio)
            .unwrap_or(self.expansion_ratio)
    }
}

/// Checkpoint storage backend
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// One JSON file per job
    #[default]
    File,
    /// One row per job in a SQLite database
    Sqlite,
}

/// Checkpoint configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CheckpointConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Directory holding checkpoints (defaults to the user data directory)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Delete the checkpoint once a job completes without failures
    #[serde(default)]
    pub cleanup_on_success: bool,
}

impl CheckpointConfig {
    /// Directory holding checkpoints
    pub fn resolved_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.directory {
            return Ok(dir.clone());
        }
        let base_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(base_dir.join("tinbox").join("checkpoints"))
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_source_language() -> String {
    AUTO_DETECT.to_string()
}

fn default_target_language() -> String {
    "en".to_string()
}

fn default_model_spec() -> String {
    "openai:gpt-4o-mini".to_string()
}

fn default_providers() -> Vec<ProviderConfig> {
    TranslationProvider::all()
        .into_iter()
        .map(ProviderConfig::new)
        .collect()
}

fn default_endpoint(provider: TranslationProvider) -> String {
    match provider {
        TranslationProvider::OpenAI => "https://api.openai.com/v1".to_string(),
        TranslationProvider::Anthropic => "https://api.anthropic.com".to_string(),
        TranslationProvider::Ollama => "http://localhost:11434".to_string(),
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_temperature() -> Option<f32> {
    Some(0.3)
}

fn default_max_resegment_depth() -> u32 {
    2
}

fn default_window_size() -> usize {
    2000
}

fn default_window_overlap() -> usize {
    200
}

fn default_context_chars() -> usize {
    300
}

fn default_min_match_chars() -> usize {
    20
}

fn default_approximate_match_ratio() -> f64 {
    0.8
}

fn default_seam_context_lines() -> usize {
    1
}

fn default_expansion_ratio() -> f64 {
    1.0
}

fn default_large_document_tokens() -> u64 {
    50_000
}

fn default_image_tokens_per_page() -> u64 {
    500
}

fn default_chars_per_token() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_system_prompt() -> String {
    "You are a professional translator. Translate the following content from {source_language} to {target_language}. \
     Preserve formatting, line breaks and the original meaning and tone. \
     Output only the translation, without commentary.".to_string()
}

impl Config {
    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;
        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load a configuration file, writing the defaults first when it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }

        warn!("Config file not found at '{}', creating default config.", path.display());
        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to file: {}", path.display()))?;
        Ok(())
    }

    /// Parsed model specification
    pub fn model_spec(&self) -> Result<ModelSpec> {
        ModelSpec::parse(&self.model)
    }

    /// Connection settings for a provider, defaulted when absent
    pub fn provider_config(&self, provider: TranslationProvider) -> ProviderConfig {
        self.providers
            .iter()
            .find(|p| p.provider == provider)
            .cloned()
            .unwrap_or_else(|| ProviderConfig::new(provider))
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if !self.source_language.eq_ignore_ascii_case(AUTO_DETECT) {
            get_language_name(&self.source_language)?;
        }
        get_language_name(&self.target_language)?;

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.provider) {
                return Err(anyhow!(
                    "Provider {} is configured more than once",
                    provider.provider.display_name()
                ));
            }
        }

        let spec = self.model_spec()?;
        if !spec.provider.is_local() && self.provider_config(spec.provider).resolved_api_key().is_empty() {
            return Err(anyhow!(
                "API key is required for {} provider (set it in the config or the environment)",
                spec.provider.display_name()
            ));
        }

        if self.translation.concurrency == 0 {
            return Err(anyhow!("Concurrency must be at least 1"));
        }
        if self.translation.retry.max_attempts == 0 {
            return Err(anyhow!("Retry attempts must be at least 1"));
        }
        if self.window.size == 0 {
            return Err(anyhow!("Window size must be positive"));
        }
        if self.window.overlap >= self.window.size {
            return Err(anyhow!(
                "Window overlap ({}) must be less than window size ({})",
                self.window.overlap,
                self.window.size
            ));
        }
        if !(0.0..=1.0).contains(&self.window.approximate_match_ratio) {
            return Err(anyhow!("approximate_match_ratio must be between 0 and 1"));
        }
        if self.cost.chars_per_token == 0 {
            return Err(anyhow!("chars_per_token must be positive"));
        }
        if self.cost.expansion_ratio <= 0.0 {
            return Err(anyhow!("expansion_ratio must be positive"));
        }
        for price in &self.cost.prices {
            if price.input_cost_per_1m_tokens < 0.0 || price.output_cost_per_1m_tokens < 0.0 {
                return Err(anyhow!("Negative price for model {}", price.model));
            }
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            target_language: default_target_language(),
            model: default_model_spec(),
            algorithm: Algorithm::default(),
            translation: TranslationSettings::default(),
            window: WindowConfig::default(),
            seam: SeamConfig::default(),
            cost: CostConfig::default(),
            checkpoint: CheckpointConfig::default(),
            providers: default_providers(),
            log_level: LogLevel::default(),
        }
    }
}
