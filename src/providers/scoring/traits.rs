//! Scoring port definition.
//!
//! A [`ScoringPort`] is the opaque classifier behind the analysis run. It
//! receives one batch at a time and answers with one outcome per input
//! message. Whatever it says is advisory: safety rules are applied on top of
//! its output and can never be loosened by it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{Category, Message, MessageId, MessageSummary};

/// Classifier output for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Importance score. Higher is more important; unbounded.
    pub score: f64,
    /// Why the classifier chose this score.
    pub rationale: String,
    /// Category the classifier assigned.
    pub category: Category,
}

impl Score {
    pub fn new(score: f64, category: Category, rationale: impl Into<String>) -> Self {
        Self {
            score,
            rationale: rationale.into(),
            category,
        }
    }
}

/// Why a single message could not be scored.
///
/// These are recorded in the outcome log and never abort a batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ScoreFailure {
    #[error("scoring timed out after {0:?}")]
    Timeout(Duration),

    #[error("scoring service rejected the message: {0}")]
    Rejected(String),

    #[error("unusable classifier reply: {0}")]
    InvalidResponse(String),

    #[error("classifier returned a non-finite score")]
    NonFiniteScore,

    #[error("no outcome returned for this message")]
    MissingOutcome,
}

/// Outcome for one message of a batch.
pub type ScoreOutcome = Result<Score, ScoreFailure>;

/// Outcome of summarizing one message.
pub type SummaryOutcome = Result<MessageSummary, ScoreFailure>;

/// The scoring service could not process a batch at all.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// The service could not be reached.
    #[error("scoring service unreachable: {0}")]
    Unreachable(String),

    /// The service refused every request (bad credentials, unknown model).
    #[error("scoring service rejected the batch: {0}")]
    Rejected(String),
}

/// Interface to the external classifier.
#[async_trait]
pub trait ScoringPort: Send + Sync {
    /// Identifies the classifier; stored on each analysis it produces.
    fn name(&self) -> &str;

    /// Scores a batch.
    ///
    /// Returns one `(id, outcome)` pair per input message, in input order.
    /// `Err` is reserved for failures that affect the whole batch.
    async fn score_batch(
        &self,
        batch: &[Message],
    ) -> Result<Vec<(MessageId, ScoreOutcome)>, ScoringError>;
}

/// Produces short summaries of messages.
///
/// Summaries are best effort: a failure never affects the score of the
/// same message.
#[async_trait]
pub trait SummaryPort: Send + Sync {
    /// Summarizes a batch, one `(id, outcome)` pair per input message in
    /// input order.
    async fn summarize_batch(&self, batch: &[Message]) -> Vec<(MessageId, SummaryOutcome)>;
}
