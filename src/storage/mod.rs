//! Record persistence.
//!
//! This module provides the storage layer for mailsift:
//!
//! - [`RecordStore`], the port the services persist through
//! - [`JsonRecordStore`], a JSON document replaced atomically on every save
//! - [`MemoryRecordStore`], an in-process store for tests and dry runs
//!
//! Blocking file I/O runs on `tokio::task::spawn_blocking`.

mod atomic;
mod record_store;

pub use atomic::{atomic_write, sweep_leftovers};
pub use record_store::{
    decode_document, encode_document, DocumentMetadata, JsonRecordStore, MemoryRecordStore,
    RecordStore, Result, StorageError,
};
