/*!
 * Model Interface and provider implementations.
 *
 * Every backend implements `ModelInterface`, which turns one `TranslationUnit` into a
 * `UnitResult`. Adapters only need to implement `complete`; refusals and length limits
 * come back as a `FinishReason`, never as errors. Errors are reserved for
 * rate limits, network trouble and unusable credentials.
 *
 * - OpenAI: chat completions API
 * - Anthropic: messages API
 * - Ollama: local chat API
 * - Mock: scripted behaviour for tests
 */

use async_trait::async_trait;
use bytes::Bytes;
use log::error;
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{Config, ModelSpec, ReasoningEffort, TranslationProvider, TranslationSettings, Verbosity};
use crate::errors::{ProviderError, TranslationError};
use crate::translation::prompts;
use crate::translation::unit::{FinishReason, TokenUsage, TranslationUnit, UnitContent, UnitResult};

pub mod anthropic;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Per-call generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    pub max_output_tokens: u32,
}

impl ModelParams {
    pub fn from_settings(settings: &TranslationSettings, max_output_tokens: u32) -> Self {
        Self {
            temperature: settings.temperature,
            top_p: settings.top_p,
            reasoning_effort: settings.reasoning_effort,
            verbosity: settings.verbosity,
            max_output_tokens,
        }
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::from_settings(&TranslationSettings::default(), 8192)
    }
}

/// Whether a model family rejects `temperature` / `top_p`
pub fn is_reasoning_model(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    ["gpt-5", "o1", "o3", "o4"].iter().any(|prefix| name.starts_with(prefix))
}

/// Whether a model accepts the `verbosity` control
pub fn supports_verbosity(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    name.starts_with("gpt-5")
}

/// User turn content sent to a model
#[derive(Debug, Clone, PartialEq)]
pub enum UserContent {
    Text(String),
    Image {
        data: Bytes,
        media_type: String,
        instruction: String,
    },
}

/// Raw generation returned by an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Everything needed to translate one unit
#[derive(Debug, Clone)]
pub struct UnitRequest {
    pub unit: TranslationUnit,
    pub source_lang: String,
    pub target_lang: String,
    /// Preceding source text, for disambiguation only
    pub context: Option<String>,
    pub system_prompt: String,
    pub params: ModelParams,
    /// Return the model output as is instead of trimmed
    pub preserve_whitespace: bool,
}

impl UnitRequest {
    /// User content for this request
    pub fn user_content(&self) -> UserContent {
        match self.unit.content() {
            UnitContent::Text(text) => UserContent::Text(prompts::text_prompt(text, self.context.as_deref())),
            UnitContent::Image { data, media_type } => UserContent::Image {
                data: data.clone(),
                media_type: media_type.clone(),
                instruction: prompts::image_prompt(&self.target_lang),
            },
        }
    }
}

/// Capability contract every model backend satisfies
#[async_trait]
pub trait ModelInterface: Send + Sync + Debug {
    /// Model identifier reported in results
    fn model_name(&self) -> &str;

    /// Run one generation
    async fn complete(
        &self,
        system: &str,
        content: UserContent,
        params: &ModelParams,
    ) -> Result<Completion, ProviderError>;

    /// Translate one unit
    async fn translate(&self, request: &UnitRequest) -> Result<UnitResult, ProviderError> {
        let completion = self
            .complete(&request.system_prompt, request.user_content(), &request.params)
            .await?;
        let translated_text = if request.preserve_whitespace {
            completion.text
        } else {
            completion.text.trim().to_string()
        };
        Ok(UnitResult {
            sequence_index: request.unit.sequence_index(),
            translated_text,
            tokens_used: completion.tokens,
            model_used: self.model_name().to_string(),
            finish_reason: completion.finish_reason,
            unit_kind: request.unit.kind(),
        })
    }

    /// Plain text generation, used for seam repair
    async fn complete_text(&self, system: &str, prompt: &str, params: &ModelParams) -> Result<Completion, ProviderError> {
        self.complete(system, UserContent::Text(prompt.to_string()), params).await
    }

    /// Test the connection to the provider
    async fn validate(&self) -> Result<(), ProviderError> {
        let params = ModelParams {
            max_output_tokens: 16,
            ..ModelParams::default()
        };
        self.complete_text("Reply with OK.", "Hello", &params).await.map(|_| ())
    }
}

/// Resolve a model specification to a translator
pub fn create_translator(spec: &ModelSpec, config: &Config) -> Result<Arc<dyn ModelInterface>, TranslationError> {
    let provider_config = config.provider_config(spec.provider);
    let translator: Arc<dyn ModelInterface> = match spec.provider {
        TranslationProvider::OpenAI => Arc::new(openai::OpenAI::new(&provider_config, &spec.model)?),
        TranslationProvider::Anthropic => Arc::new(anthropic::Anthropic::new(&provider_config, &spec.model)?),
        TranslationProvider::Ollama => Arc::new(ollama::Ollama::new(&provider_config, &spec.model)?),
    };
    Ok(translator)
}

/// Build the HTTP client shared by the adapters
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client, TranslationError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TranslationError::InvalidConfig(format!("Failed to build HTTP client: {}", e)))
}

/// Turn an unsuccessful HTTP response into a classified error
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error response text".to_string());
    error!("{} API error ({}): {}", provider, status, error_text);
    ProviderError::from_status(status.as_u16(), error_text, retry_after)
}
