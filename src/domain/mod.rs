//! Domain layer types for mailsift.
//!
//! This module contains the core domain types used throughout the crate:
//! mailbox messages, analysis results, and the record set that ties them
//! together.

mod analysis;
mod message;
mod record;
mod types;

pub use analysis::{
    AnalysisResult, Category, ImportanceTier, MessageSummary, Sentiment, TierThresholds,
};
pub use message::Message;
pub use record::{Record, RecordSet};
pub use types::{MessageId, ThreadId};
