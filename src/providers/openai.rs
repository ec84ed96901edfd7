use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::{ProviderConfig, ReasoningEffort};
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{
    error_from_response, http_client, is_reasoning_model, supports_verbosity, Completion, ModelInterface,
    ModelParams, UserContent,
};
use crate::translation::unit::{FinishReason, TokenUsage};

/// OpenAI client for interacting with the chat completions API
#[derive(Debug)]
pub struct OpenAI {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API base URL
    endpoint: String,
    /// Model name
    model: String,
}

/// Chat completions request
#[derive(Debug, Serialize)]
pub struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbosity: Option<String>,
}

/// Chat message
#[derive(Debug, Serialize)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: OpenAIContent,
}

/// Message content: a plain string or a list of typed parts
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

/// Typed content part
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Serialize)]
pub struct OpenAIImageUrl {
    pub url: String,
}

/// Chat completions response
#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIChoice {
    pub message: OpenAIResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct OpenAIUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl OpenAIRequest {
    /// Build a request, dropping parameters the model family rejects
    pub fn new(model: &str, system: &str, content: UserContent, params: &ModelParams) -> Self {
        let reasoning = is_reasoning_model(model);
        let user_content = match content {
            UserContent::Text(text) => OpenAIContent::Text(text),
            UserContent::Image {
                data,
                media_type,
                instruction,
            } => OpenAIContent::Parts(vec![
                OpenAIContentPart::Text { text: instruction },
                OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: format!("data:{};base64,{}", media_type, BASE64.encode(&data)),
                    },
                },
            ]),
        };

        // Only gpt-5 accepts "minimal"
        let reasoning_effort = reasoning.then(|| match params.reasoning_effort {
            ReasoningEffort::Minimal if !supports_verbosity(model) => "low".to_string(),
            effort => effort.as_str().to_string(),
        });

        Self {
            model: model.to_string(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: OpenAIContent::Text(system.to_string()),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: user_content,
                },
            ],
            max_completion_tokens: params.max_output_tokens,
            temperature: if reasoning { None } else { params.temperature },
            top_p: if reasoning { None } else { params.top_p },
            reasoning_effort,
            verbosity: supports_verbosity(model).then(|| params.verbosity.as_str().to_string()),
        }
    }
}

impl OpenAIResponse {
    /// Convert into a completion, mapping refusals and length limits
    pub fn into_completion(self) -> Result<Completion, ProviderError> {
        let tokens = self
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("No choices in OpenAI response".to_string()))?;

        let refused = choice.message.refusal.as_deref().is_some_and(|r| !r.is_empty());
        let finish_reason = match choice.finish_reason.as_deref() {
            _ if refused => FinishReason::Refused,
            Some("content_filter") => FinishReason::Refused,
            Some("length") => FinishReason::Truncated,
            _ => FinishReason::Complete,
        };
        let text = if refused {
            choice.message.refusal.unwrap_or_default()
        } else {
            choice.message.content.unwrap_or_default()
        };

        Ok(Completion {
            text,
            tokens,
            finish_reason,
        })
    }
}

impl OpenAI {
    /// Create a new OpenAI client
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
impl ModelInterface for OpenAI {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, content: UserContent, params: &ModelParams) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let request = OpenAIRequest::new(&self.model, system, content, params);
        debug!("OpenAI request to {} for model {}", url, self.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response("OpenAI", response).await);
        }

        let parsed = response
            .json::<OpenAIResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse OpenAI API response: {}", e)))?;
        parsed.into_completion()
    }
}
