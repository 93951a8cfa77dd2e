//! mailsift - scores unread email by importance and picks safe cleanup candidates
//!
//! This crate provides the reconciliation and batch-analysis engine: it
//! merges mailbox snapshots into a durable record set, scores messages
//! through a pluggable classifier, enforces safety rules the classifier
//! cannot override, and ranks deletion candidates.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;

pub use config::{AnalysisConfig, Settings};
pub use domain::{AnalysisResult, Message, MessageId, RecordSet};
pub use services::TriageService;
