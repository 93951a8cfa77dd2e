//! File-backed mailbox.
//!
//! Reads a JSON export (an array of messages) and serves it through the
//! mailbox ports. Read-state changes are written back atomically.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{MailboxFetch, MailboxMutation, MarkReadReport, Result, TransportError};
use crate::domain::{Message, MessageId};
use crate::storage::atomic_write;

/// Mailbox backed by a JSON file of messages.
#[derive(Debug, Clone)]
pub struct SnapshotMailbox {
    path: Arc<PathBuf>,
    // Serializes read-modify-write cycles on the file.
    write_lock: Arc<Mutex<()>>,
}

impl SnapshotMailbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Message>> {
        let path = Arc::clone(&self.path);
        tokio::task::spawn_blocking(move || read_messages(&path))
            .await
            .map_err(|e| TransportError::Connection(format!("mailbox task failed: {e}")))?
    }

    async fn write_all(&self, messages: Vec<Message>) -> Result<()> {
        let path = Arc::clone(&self.path);
        let bytes = serde_json::to_vec_pretty(&messages)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
            .await
            .map_err(|e| TransportError::Connection(format!("mailbox task failed: {e}")))?
            .map_err(|e| {
                TransportError::Rejected(format!("cannot write {}: {e}", self.path.display()))
            })
    }
}

fn read_messages(path: &Path) -> Result<Vec<Message>> {
    let bytes = std::fs::read(path).map_err(|e| {
        TransportError::Connection(format!("cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        TransportError::InvalidResponse(format!("{} is not a message export: {e}", path.display()))
    })
}

#[async_trait]
impl MailboxFetch for SnapshotMailbox {
    async fn fetch_unread(&self, max_count: usize) -> Result<Vec<Message>> {
        let mut unread: Vec<Message> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|m| !m.is_read)
            .collect();

        // Newest first, matching what a provider's inbox listing returns.
        unread.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        unread.truncate(max_count);

        debug!(path = %self.path.display(), count = unread.len(), "Fetched unread messages");
        Ok(unread)
    }
}

#[async_trait]
impl MailboxMutation for SnapshotMailbox {
    async fn mark_read(&self, ids: &BTreeSet<MessageId>) -> Result<MarkReadReport> {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.read_all().await?;
        let mut report = MarkReadReport::default();

        for id in ids {
            match messages.iter_mut().find(|m| &m.id == id) {
                Some(message) => {
                    message.is_read = true;
                    report.record_success(id.clone());
                }
                None => report.record_failure(id.clone(), "message not found in mailbox"),
            }
        }

        if !report.succeeded.is_empty() {
            self.write_all(messages).await?;
        }

        info!(
            marked = report.succeeded.len(),
            failed = report.failed.len(),
            "Marked messages as read"
        );
        Ok(report)
    }
}
