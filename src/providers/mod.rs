//! External collaborators.
//!
//! - [`ai`] - LLM providers (OpenAI-compatible, Ollama)
//! - [`scoring`] - the scoring port and its LLM-backed implementation
//! - [`mailbox`] - mailbox fetch/mutation ports and a file-backed mailbox

pub mod ai;
pub mod mailbox;
pub mod scoring;
