//! Mailbox port definitions.
//!
//! The analysis core never talks to a mail server directly. It consumes two
//! narrow ports: [`MailboxFetch`] supplies unread message snapshots and
//! [`MailboxMutation`] applies read-state changes chosen from the candidate
//! list. Implementations own transport, authentication and retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::{Message, MessageId};

/// Result type alias for mailbox operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that make a whole mailbox call fail.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The provider refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The provider answered with something that could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of unread message snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailboxFetch: Send + Sync {
    /// Fetches up to `max_count` unread messages.
    async fn fetch_unread(&self, max_count: usize) -> Result<Vec<Message>>;
}

/// Applies read-state changes to the mailbox.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailboxMutation: Send + Sync {
    /// Marks every id as read.
    ///
    /// Individual ids may fail while others succeed; those failures are
    /// reported in the returned [`MarkReadReport`]. An `Err` means nothing
    /// was applied.
    async fn mark_read(&self, ids: &BTreeSet<MessageId>) -> Result<MarkReadReport>;
}

/// Outcome of a mark-read call, one entry per requested id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadReport {
    /// Ids the provider marked as read.
    pub succeeded: BTreeSet<MessageId>,
    /// Ids that could not be marked, with the provider's reason.
    pub failed: Vec<(MessageId, String)>,
}

impl MarkReadReport {
    pub fn record_success(&mut self, id: MessageId) {
        self.succeeded.insert(id);
    }

    pub fn record_failure(&mut self, id: MessageId, reason: impl Into<String>) {
        self.failed.push((id, reason.into()));
    }

    /// Whether every requested id was applied.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}
