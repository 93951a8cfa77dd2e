//! Scoring port and its LLM-backed implementation.

mod llm;
mod traits;

pub use llm::{parse_reply, parse_summary, LlmScorer};
pub use traits::{
    Score, ScoreFailure, ScoreOutcome, ScoringError, ScoringPort, SummaryOutcome, SummaryPort,
};
