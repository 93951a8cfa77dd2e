//! Mailbox message metadata.
//!
//! A [`Message`] is the snapshot of one unread mailbox entry as the provider
//! reported it at fetch time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{MessageId, ThreadId};

/// Metadata snapshot of a single mailbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Provider-assigned identifier.
    pub id: MessageId,
    /// Conversation this message belongs to, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    /// Sender address. May be a bare address or `Name <address>`.
    pub sender: String,
    /// Sender display name, when known separately from the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Whether the message has been read.
    #[serde(default)]
    pub is_read: bool,
    /// Short body excerpt.
    #[serde(default)]
    pub excerpt: String,
    /// Provider labels applied to the message.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Approximate size in bytes.
    #[serde(default)]
    pub size_estimate: u64,
}

impl Message {
    /// Creates an unread message with empty optional fields.
    pub fn new(
        id: impl Into<MessageId>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            sender: sender.into(),
            sender_name: None,
            subject: subject.into(),
            received_at,
            is_read: false,
            excerpt: String::new(),
            labels: BTreeSet::new(),
            size_estimate: 0,
        }
    }

    /// Sets the body excerpt.
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    /// Adds a provider label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Returns the bare, lower-cased sender address.
    ///
    /// Strips a display name in the `Name <address>` form.
    pub fn sender_address(&self) -> String {
        let raw = self.sender.trim();
        let address = match (raw.rfind('<'), raw.rfind('>')) {
            (Some(start), Some(end)) if start < end => &raw[start + 1..end],
            _ => raw,
        };
        address.trim().to_lowercase()
    }

    /// Returns the lower-cased domain of the sender address, if it has one.
    pub fn sender_domain(&self) -> Option<String> {
        let address = self.sender_address();
        let (_, domain) = address.rsplit_once('@')?;
        if domain.is_empty() {
            None
        } else {
            Some(domain.to_string())
        }
    }

    /// Returns the name to show for the sender.
    pub fn sender_display(&self) -> String {
        if let Some(name) = &self.sender_name {
            return name.clone();
        }
        match self.sender.find('<') {
            Some(pos) if pos > 0 => self.sender[..pos].trim().trim_matches('"').to_string(),
            _ => self.sender.trim().to_string(),
        }
    }
}
