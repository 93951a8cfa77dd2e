//! AI/LLM provider implementations.
//!
//! This module provides a unified interface for the language models that
//! score messages.
//!
//! # Supported Providers
//!
//! - **OpenAI-compatible**: Works with OpenAI, vLLM, LM Studio, and other compatible endpoints
//! - **Ollama**: Local LLM inference via Ollama
//!
//! # Example
//!
//! ```rust,no_run
//! use mailsift::providers::ai::{ChatMessage, CompletionRequest, LlmProvider, OllamaProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ollama = OllamaProvider::new("llama3.2");
//!
//! let request = CompletionRequest::new(vec![ChatMessage::user("Subject: 50% off today")])
//!     .with_system_prompt("Rate this email's importance as JSON.");
//!
//! let response = ollama.complete(&request).await?;
//! println!("Response: {}", response.text);
//! # Ok(())
//! # }
//! ```

mod ollama;
mod openai;
mod traits;

pub use ollama::OllamaProvider;
pub use openai::OpenAiCompatibleProvider;
pub use traits::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider,
    LlmResult, Role, TokenUsage,
};
