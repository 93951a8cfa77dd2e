//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/mailsift/settings.json` (or the
//! platform equivalent) and loaded once at startup.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AnalysisConfig, ConfigError};

const SETTINGS_FILE: &str = "settings.json";
const RECORDS_FILE: &str = "records.json";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "mailsift")
}

/// Top-level application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where the record set is persisted.
    pub storage: StorageSettings,
    /// Mailbox source settings.
    pub mailbox: MailboxSettings,
    /// Scoring service settings.
    pub scoring: ScoringSettings,
    /// Thresholds, batching and safety rules.
    pub analysis: AnalysisConfig,
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
    }

    /// Loads and validates settings from `path`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = match std::fs::read_to_string(path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No settings file, using defaults");
                Settings::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mailbox.validate()?;
        self.scoring.validate()?;
        self.analysis.validate()
    }
}

/// Record store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the JSON record document.
    pub records_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let records_path = project_dirs()
            .map(|dirs| dirs.data_dir().join(RECORDS_FILE))
            .unwrap_or_else(|| PathBuf::from(RECORDS_FILE));
        Self { records_path }
    }
}

/// Mailbox source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxSettings {
    /// JSON mailbox export read by the file-backed mailbox.
    pub snapshot_path: PathBuf,
    /// Maximum unread messages fetched per sync.
    pub max_fetch: usize,
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("mailbox.json"),
            max_fetch: 50,
        }
    }
}

impl MailboxSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fetch == 0 {
            return Err(ConfigError::invalid("mailbox.max_fetch", "must be at least 1"));
        }
        Ok(())
    }
}

/// Which LLM backend scores messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local Ollama server.
    Ollama,
    /// OpenAI or any OpenAI-compatible endpoint.
    OpenAi,
}

/// Scoring service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Backend kind.
    pub provider: ProviderKind,
    /// Custom API endpoint (uses the provider default when `None`).
    pub base_url: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Environment variable holding the API key, if the backend needs one.
    pub api_key_env: Option<String>,
    /// Sampling temperature (0.0 to 2.0).
    pub temperature: f32,
    /// Maximum tokens in each response.
    pub max_tokens: Option<usize>,
    /// Concurrent scoring calls within one batch.
    pub concurrency: usize,
    /// Timeout for one message's scoring call.
    pub message_timeout_secs: u64,
    /// Timeout for a whole batch.
    pub batch_timeout_secs: u64,
    /// Pause before the single retry of a call that hit a transient failure.
    pub retry_delay_ms: u64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: None,
            model: "llama3.2".to_string(),
            api_key_env: None,
            temperature: 0.1,
            max_tokens: Some(300),
            concurrency: 4,
            message_timeout_secs: 120,
            batch_timeout_secs: 900,
            retry_delay_ms: 500,
        }
    }
}

impl ScoringSettings {
    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.api_key_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ConfigError::MissingEnv(var.clone())),
            None => Ok(None),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("scoring.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                "scoring.temperature",
                "must be between 0.0 and 2.0",
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("scoring.concurrency", "must be at least 1"));
        }
        if self.message_timeout_secs == 0 || self.batch_timeout_secs == 0 {
            return Err(ConfigError::invalid("scoring timeouts", "must be at least 1 second"));
        }
        Ok(())
    }
}
