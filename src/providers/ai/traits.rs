//! LLM provider trait and supporting types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Provider not available: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Whether the error means the service itself could not be used, as
    /// opposed to a problem with one request.
    pub fn is_transport(&self) -> bool {
        match self {
            LlmError::HttpError(e) => e.is_connect() || (e.is_request() && !e.is_timeout()),
            LlmError::AuthenticationError(_) | LlmError::Unavailable(_) => true,
            LlmError::ApiError { status, .. } => *status == 404 || *status >= 502,
            LlmError::InvalidResponse(_) | LlmError::RateLimited { .. } => false,
        }
    }

    /// Whether the service refused the request outright (bad credentials,
    /// unknown model). Retrying does not help.
    pub fn is_rejection(&self) -> bool {
        match self {
            LlmError::AuthenticationError(_) => true,
            LlmError::ApiError { status, .. } => matches!(status, 401 | 403 | 404),
            _ => false,
        }
    }
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn in a conversation with the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request for a completion from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Optional system prompt to set context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature (0.0 to 2.0, lower is more deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            system_prompt: None,
            messages: Vec::new(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Reason why a completion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation.
    Stop,

    /// Hit the max_tokens limit.
    Length,

    /// Content was filtered for safety.
    ContentFilter,

    /// Unknown or provider-specific reason.
    #[serde(other)]
    Other,
}

/// Response from a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text content.
    pub text: String,

    /// Token usage statistics.
    pub tokens_used: TokenUsage,

    /// Why generation finished.
    pub finish_reason: FinishReason,
}

/// Trait for LLM providers (OpenAI-compatible endpoints, Ollama).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's name (e.g., "openai-compatible", "ollama").
    fn name(&self) -> &str;

    /// Performs a completion request and returns the full response.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Returns the model identifier being used.
    fn model(&self) -> &str;
}
