//! Ollama provider implementation.
//!
//! Ollama exposes an OpenAI-compatible API, so this is a thin wrapper
//! around OpenAiCompatibleProvider with Ollama-specific defaults.

use super::openai::OpenAiCompatibleProvider;
use super::traits::{CompletionRequest, CompletionResponse, LlmProvider, LlmResult};
use async_trait::async_trait;

/// Default Ollama API URL.
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434/v1";

/// Provider for Ollama's local LLM server.
pub struct OllamaProvider {
    inner: OpenAiCompatibleProvider,
}

impl OllamaProvider {
    /// Creates a new Ollama provider with default localhost URL.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_url(OLLAMA_DEFAULT_URL, model)
    }

    /// Creates a new Ollama provider with a custom URL.
    pub fn with_url(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        // Ollama honors `response_format` on its OpenAI endpoint.
        let inner = OpenAiCompatibleProvider::custom(base_url, None, model).with_json_mode(true);
        Self { inner }
    }

    /// Overrides the HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.inner = self.inner.with_client(client);
        self
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        self.inner.complete(request).await
    }
}
