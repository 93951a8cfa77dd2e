//! Configuration and settings management.
//!
//! This module provides the settings document, the analysis configuration
//! injected into the core services, and configuration errors.

mod analysis;
mod error;
mod settings;

pub use analysis::{AnalysisConfig, ClassRules, SafetyRules, StalenessPolicy};
pub use error::ConfigError;
pub use settings::{
    MailboxSettings, ProviderKind, ScoringSettings, Settings, StorageSettings,
};
