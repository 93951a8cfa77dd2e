//! Record set persistence.
//!
//! The record set is stored as a single JSON document keyed by message id:
//!
//! ```text
//! {
//!   "metadata": { "version": 1, "total_messages": 2, "analyzed_count": 1, ... },
//!   "messages": {
//!     "<id>": { "message": { ... }, "analysis": { ... } | null }
//!   }
//! }
//! ```
//!
//! Saves go through [`atomic_write`], so a crash mid-save leaves either the
//! previous document or the new one on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::atomic::{atomic_write, sweep_leftovers};
use crate::domain::{AnalysisResult, Message, Record, RecordSet};

/// Current document schema version.
const DOCUMENT_VERSION: u32 = 1;

/// Errors that can occur while loading or saving records.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record set: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("record document {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable home of the [`RecordSet`].
///
/// Single writer; implementations only need to guarantee that `save` is
/// atomic with respect to a crash.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Loads the persisted record set. A store that was never written loads empty.
    async fn load(&self) -> Result<RecordSet>;

    /// Replaces the persisted record set.
    async fn save(&self, records: &RecordSet) -> Result<()>;
}

/// Summary fields written alongside the records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub version: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
    pub saved_at: Option<DateTime<Utc>>,
    pub total_messages: usize,
    pub analyzed_count: usize,
}

#[derive(Serialize)]
struct StoredRecordRef<'a> {
    message: &'a Message,
    analysis: Option<&'a AnalysisResult>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StoredEntryRef<'a> {
    Record(StoredRecordRef<'a>),
    Unreadable(&'a serde_json::Value),
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    metadata: DocumentMetadata,
    messages: BTreeMap<&'a str, StoredEntryRef<'a>>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    metadata: DocumentMetadata,
    #[serde(default)]
    messages: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawRecord {
    message: Message,
    #[serde(default)]
    analysis: Option<serde_json::Value>,
}

/// Serializes a record set into the persisted document format.
pub fn encode_document(records: &RecordSet) -> Result<Vec<u8>> {
    let messages = records
        .unreadable()
        .map(|(key, raw)| (key, StoredEntryRef::Unreadable(raw)))
        .chain(records.iter().map(|record| {
            (
                record.message.id.as_str(),
                StoredEntryRef::Record(StoredRecordRef {
                    message: &record.message,
                    analysis: record.analysis.as_ref(),
                }),
            )
        }))
        .collect();

    let document = DocumentRef {
        metadata: DocumentMetadata {
            version: DOCUMENT_VERSION,
            last_sync: records.last_sync(),
            last_analysis: records.last_analysis(),
            saved_at: Some(Utc::now()),
            total_messages: records.len(),
            analyzed_count: records.analyzed_count(),
        },
        messages,
    };

    serde_json::to_vec_pretty(&document).map_err(StorageError::Serialize)
}

/// Parses a persisted document.
///
/// Analyses that are missing or do not match the current schema load as
/// unanalyzed. Entries whose message itself cannot be read are kept
/// verbatim on the record set and written back by the next save.
pub fn decode_document(bytes: &[u8], path: &Path) -> Result<RecordSet> {
    let raw: RawDocument =
        serde_json::from_slice(bytes).map_err(|source| StorageError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    if raw.metadata.version > DOCUMENT_VERSION {
        tracing::warn!(
            version = raw.metadata.version,
            "Record document is newer than this build, reading known fields only"
        );
    }

    let mut records = RecordSet::new();
    let mut unreadable = Vec::new();
    for (key, value) in raw.messages {
        let entry = match RawRecord::deserialize(&value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(message_id = %key, error = %e, "Keeping unreadable record as is");
                unreadable.push((key, value));
                continue;
            }
        };

        if entry.message.id.as_str() != key {
            tracing::warn!(
                key = %key,
                message_id = %entry.message.id,
                "Record key does not match message id, using message id"
            );
        }

        let analysis = entry
            .analysis
            .filter(|value| !value.is_null())
            .and_then(|value| match serde_json::from_value::<AnalysisResult>(value) {
                Ok(analysis) => Some(analysis),
                Err(e) => {
                    tracing::warn!(
                        message_id = %entry.message.id,
                        error = %e,
                        "Discarding analysis in an older format"
                    );
                    None
                }
            });

        records.insert(Record {
            message: entry.message,
            analysis,
        });
    }

    // After every readable record, so a readable entry always wins its key.
    let kept = unreadable.len();
    for (key, value) in unreadable {
        records.keep_unreadable(key, value);
    }
    if kept > 0 {
        tracing::warn!(
            count = kept,
            loaded = records.len(),
            "Record document has entries this build cannot read"
        );
    }

    if let Some(at) = raw.metadata.last_sync {
        records.set_last_sync(at);
    }
    if let Some(at) = raw.metadata.last_analysis {
        records.set_last_analysis(at);
    }

    Ok(records)
}

/// Record store backed by a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: Arc<PathBuf>,
}

impl JsonRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn load(&self) -> Result<RecordSet> {
        let path = Arc::clone(&self.path);

        let records = tokio::task::spawn_blocking(move || -> Result<RecordSet> {
            let swept = sweep_leftovers(&path);
            if swept > 0 {
                tracing::warn!(count = swept, "Removed temp files from an interrupted save");
            }
            let bytes = match std::fs::read(path.as_path()) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(RecordSet::new());
                }
                Err(source) => {
                    return Err(StorageError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            };
            decode_document(&bytes, &path)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        tracing::debug!(
            path = %self.path.display(),
            total = records.len(),
            analyzed = records.analyzed_count(),
            "Loaded record set"
        );
        Ok(records)
    }

    async fn save(&self, records: &RecordSet) -> Result<()> {
        // Encode before touching the filesystem so a serialization failure
        // never reaches the disk.
        let bytes = encode_document(records)?;
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            atomic_write(&path, &bytes).map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        tracing::debug!(
            path = %self.path.display(),
            total = records.len(),
            analyzed = records.analyzed_count(),
            "Saved record set"
        );
        Ok(())
    }
}

/// In-memory record store for tests and dry runs.
///
/// Keeps the encoded document so saves go through the same format as the
/// JSON store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    document: Mutex<Option<Vec<u8>>>,
    saves: Mutex<usize>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `records`.
    pub fn with_records(records: &RecordSet) -> Result<Self> {
        let store = Self::new();
        *store.lock_document()? = Some(encode_document(records)?);
        Ok(store)
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    fn lock_document(&self) -> Result<std::sync::MutexGuard<'_, Option<Vec<u8>>>> {
        self.document
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self) -> Result<RecordSet> {
        match self.lock_document()?.as_deref() {
            Some(bytes) => decode_document(bytes, Path::new("<memory>")),
            None => Ok(RecordSet::new()),
        }
    }

    async fn save(&self, records: &RecordSet) -> Result<()> {
        let bytes = encode_document(records)?;
        *self.lock_document()? = Some(bytes);
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}
