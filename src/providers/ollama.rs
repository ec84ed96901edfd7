use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::ProviderConfig;
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{error_from_response, http_client, Completion, ModelInterface, ModelParams, UserContent};
use crate::translation::unit::{FinishReason, TokenUsage};

/// Ollama client for interacting with Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
    /// Model name
    model: String,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature for generation (default: 0.8)
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Top-p sampling (default: 0.9)
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Chat message object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant, or tool)
    pub role: String,
    /// Content of the message
    pub content: String,
    /// Base64 encoded images attached to the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Chat request for the Ollama API
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    /// Model name to use for generation
    model: String,
    /// Messages of the conversation
    messages: Vec<ChatMessage>,
    /// Additional model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    /// Whether to stream the response
    stream: bool,
}

/// Chat response from the Ollama API
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Generated message
    pub message: ChatMessage,
    /// Why generation stopped (`stop`, `length`)
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Number of prompt tokens
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(default)]
    pub eval_count: Option<u64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, system: &str, content: UserContent, params: &ModelParams) -> Self {
        let user = match content {
            UserContent::Text(text) => ChatMessage {
                role: "user".to_string(),
                content: text,
                images: None,
            },
            UserContent::Image { data, instruction, .. } => ChatMessage {
                role: "user".to_string(),
                content: instruction,
                images: Some(vec![BASE64.encode(&data)]),
            },
        };

        Self {
            model: model.into(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                    images: None,
                },
                user,
            ],
            options: Some(GenerationOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                num_predict: Some(params.max_output_tokens),
            }),
            stream: false,
        }
    }
}

impl ChatResponse {
    pub fn into_completion(self) -> Completion {
        let finish_reason = match self.done_reason.as_deref() {
            Some("length") => FinishReason::Truncated,
            _ => FinishReason::Complete,
        };
        Completion {
            text: self.message.content,
            tokens: TokenUsage::new(self.prompt_eval_count.unwrap_or(0), self.eval_count.unwrap_or(0)),
            finish_reason,
        }
    }
}

impl Ollama {
    /// Create a new Ollama client
    pub fn new(config: &ProviderConfig, model: impl Into<String>) -> Result<Self, TranslationError> {
        Ok(Self {
            base_url: config.resolved_endpoint().trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ModelInterface for Ollama {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, content: UserContent, params: &ModelParams) -> Result<Completion, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest::new(&self.model, system, content, params);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response("Ollama", response).await);
        }

        let chat_response = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse Ollama API response: {}", e)))?;

        Ok(chat_response.into_completion())
    }

    /// Test the connection to the Ollama server
    async fn validate(&self) -> Result<(), ProviderError> {
        let url = format!("{}/api/version", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response("Ollama", response).await);
        }
        Ok(())
    }
}
