use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::ProviderConfig;
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{error_from_response, http_client, Completion, ModelInterface, ModelParams, UserContent};
use crate::translation::unit::{FinishReason, TokenUsage};

/// Anthropic client for interacting with Anthropic API
#[derive(Debug)]
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API endpoint URL
    endpoint: String,
    /// Model name
    model: String,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// The model to use
    model: String,

    /// The messages for the conversation
    messages: Vec<AnthropicMessage>,

    /// System prompt to guide the AI
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,

    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    /// Maximum number of tokens to generate
    max_tokens: u32,

    /// Top probability mass to consider (nucleus sampling)
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

/// Anthropic message format
#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,

    /// Content blocks of the message
    pub content: Vec<AnthropicBlock>,
}

/// Request content block
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnthropicBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

/// Inline image payload
#[derive(Debug, Serialize)]
pub struct AnthropicImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    /// Number of input tokens
    pub input_tokens: u64,
    /// Number of output tokens
    pub output_tokens: u64,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// The content of the response
    pub content: Vec<AnthropicContent>,
    /// Why generation stopped
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage information
    pub usage: AnthropicUsage,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    /// The type of content
    #[serde(rename = "type")]
    pub content_type: String,

    /// The actual text content
    #[serde(default)]
    pub text: Option<String>,
}

impl AnthropicRequest {
    /// Create a new Anthropic request
    pub fn new(model: impl Into<String>, system: &str, content: UserContent, params: &ModelParams) -> Self {
        let blocks = match content {
            UserContent::Text(text) => vec![AnthropicBlock::Text { text }],
            UserContent::Image {
                data,
                media_type,
                instruction,
            } => vec![
                AnthropicBlock::Image {
                    source: AnthropicImageSource {
                        source_type: "base64".to_string(),
                        media_type,
                        data: BASE64.encode(&data),
                    },
                },
                AnthropicBlock::Text { text: instruction },
            ],
        };

        Self {
            model: model.into(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: blocks,
            }],
            system: (!system.is_empty()).then(|| system.to_string()),
            temperature: params.temperature,
            max_tokens: params.max_output_tokens,
            top_p: params.top_p,
        }
    }
}

impl AnthropicResponse {
    /// Extract text from Anthropic response
    pub fn extract_text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect()
    }

    pub fn into_completion(self) -> Completion {
        let finish_reason = match self.stop_reason.as_deref() {
            Some("max_tokens") => FinishReason::Truncated,
            Some("refusal") => FinishReason::Refused,
            _ => FinishReason::Complete,
        };
        Completion {
            text: self.extract_text(),
            tokens: TokenUsage::new(self.usage.input_tokens, self.usage.output_tokens),
            finish_reason,
        }
    }
}

impl Anthropic {
    /// Create a new Anthropic client
    pub fn new(config: &ProviderConfig, model: impl Into<String>) -> Result<Self, TranslationError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: config.resolved_api_key(),
            endpoint: config.resolved_endpoint(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ModelInterface for Anthropic {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, content: UserContent, params: &ModelParams) -> Result<Completion, ProviderError> {
        let api_url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));
        let request = AnthropicRequest::new(&self.model, system, content, params);

        let response = self
            .client
            .post(&api_url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("Anthropic", response).await);
        }

        let anthropic_response = response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse Anthropic API response: {}", e)))?;

        Ok(anthropic_response.into_completion())
    }
}
