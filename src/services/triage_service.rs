//! Workflow facade used by the CLI.
//!
//! Ties the mailbox ports, the record store and the analysis services into
//! the steps a user runs: sync, analyze, list candidates, mark read and
//! summarize. Each step loads the record set, works on it and saves it if
//! it changed.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::analysis_service::{AnalysisError, AnalysisReport, AnalysisService, ProgressObserver};
use super::candidate_selector::{Candidate, CandidateSelector};
use super::reconciliation::{reconcile_with_report, SyncReport};
use super::report::{Digest, ImportanceSummary};
use super::safety_policy::{DeletionCheck, SafetyPolicy};
use crate::config::{AnalysisConfig, ConfigError};
use crate::domain::{MessageId, Record};
use crate::providers::mailbox::{MailboxFetch, MailboxMutation, MarkReadReport, TransportError};
use crate::providers::scoring::{ScoringPort, SummaryPort};
use crate::storage::{RecordStore, StorageError};

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, TriageError>;

/// Errors surfaced by workflow steps.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("mailbox error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("message {0} is not in the record store")]
    UnknownMessage(MessageId),

    /// The mailbox applied the change but the local store could not be
    /// updated. `report` says which ids the mailbox marked.
    #[error("mailbox marked {} messages as read but saving the change failed: {source}", report.succeeded.len())]
    MirrorFailed {
        report: MarkReadReport,
        #[source]
        source: StorageError,
    },
}

/// A stored message with its deletion verdict.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub record: Record,
    pub check: DeletionCheck,
}

/// High-level triage workflow.
pub struct TriageService<S: RecordStore> {
    store: Arc<S>,
    fetch: Arc<dyn MailboxFetch>,
    mutation: Arc<dyn MailboxMutation>,
    policy: Arc<SafetyPolicy>,
    analysis: AnalysisService<S>,
    selector: CandidateSelector,
}

impl<S: RecordStore> TriageService<S> {
    /// Validates `config` and wires the services together.
    pub fn new(
        store: Arc<S>,
        fetch: Arc<dyn MailboxFetch>,
        mutation: Arc<dyn MailboxMutation>,
        scorer: Arc<dyn ScoringPort>,
        config: Arc<AnalysisConfig>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let policy = Arc::new(SafetyPolicy::new(config)?);

        Ok(Self {
            analysis: AnalysisService::new(Arc::clone(&store), scorer, Arc::clone(&policy)),
            selector: CandidateSelector::new(Arc::clone(&policy)),
            store,
            fetch,
            mutation,
            policy,
        })
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.analysis = self.analysis.with_batch_timeout(timeout);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn SummaryPort>) -> Self {
        self.analysis = self.analysis.with_summarizer(summarizer);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        self.policy.config()
    }

    /// Fetches unread mail and reconciles it into the store.
    pub async fn sync(&self, max_count: usize) -> Result<SyncReport> {
        if max_count == 0 {
            return Err(ConfigError::invalid("max_count", "must be at least 1").into());
        }

        let fetched = self.fetch.fetch_unread(max_count).await?;
        let existing = self.store.load().await?;
        let (mut records, report) = reconcile_with_report(&existing, fetched);
        records.set_last_sync(Utc::now());
        self.store.save(&records).await?;

        info!(
            fetched = report.fetched,
            carried_over = report.carried_over,
            new = report.new_ids.len(),
            dropped = report.dropped_ids.len(),
            "Sync complete"
        );
        Ok(report)
    }

    /// Analyzes pending messages. Uses the configured batch size when
    /// `batch_size` is `None`.
    pub async fn analyze(
        &self,
        batch_size: Option<usize>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport> {
        let batch_size = batch_size.unwrap_or(self.config().batch_size);
        let mut records = self.store.load().await?;
        Ok(self
            .analysis
            .analyze(&mut records, batch_size, observer, cancel)
            .await?)
    }

    /// Lists deletion candidates. Uses the configured cutoff when
    /// `min_score` is `None`.
    pub async fn candidates(&self, min_score: Option<f64>, limit: usize) -> Result<Vec<Candidate>> {
        let records = self.store.load().await?;
        let min_score = min_score.unwrap_or(self.config().deletion_cutoff);
        Ok(self.selector.select(&records, min_score, limit)?)
    }

    /// Marks messages as read in the mailbox and mirrors the change locally.
    ///
    /// Ids the mailbox could not mark are returned in the report and left
    /// unread in the store. The store is loaded before the mailbox is
    /// touched; if saving afterwards fails the report is carried in
    /// [`TriageError::MirrorFailed`].
    pub async fn mark_read(&self, ids: &BTreeSet<MessageId>) -> Result<MarkReadReport> {
        if ids.is_empty() {
            return Ok(MarkReadReport::default());
        }

        let mut records = self.store.load().await?;
        let report = self.mutation.mark_read(ids).await?;
        for (id, reason) in &report.failed {
            warn!(message_id = %id, %reason, "Mailbox did not mark message as read");
        }

        let mut changed = 0;
        for id in &report.succeeded {
            if records.set_read(id, true) {
                changed += 1;
            }
        }
        if changed > 0 {
            if let Err(source) = self.store.save(&records).await {
                warn!(
                    marked = report.succeeded.len(),
                    error = %source,
                    "Mailbox updated but saving read state failed"
                );
                return Err(TriageError::MirrorFailed { report, source });
            }
        }

        info!(
            requested = ids.len(),
            marked = report.succeeded.len(),
            failed = report.failed.len(),
            "Mark read complete"
        );
        Ok(report)
    }

    /// Summarizes analysis coverage and tiers.
    pub async fn summary(&self) -> Result<ImportanceSummary> {
        let records = self.store.load().await?;
        Ok(ImportanceSummary::from_records(
            &records,
            &self.policy,
            Utc::now(),
        ))
    }

    /// Builds a digest of messages received in the last `days` days, or of
    /// every stored message when `days` is `None`.
    pub async fn digest(&self, days: Option<u32>) -> Result<Digest> {
        let records = self.store.load().await?;
        let since = days.map(|days| Utc::now() - ChronoDuration::days(i64::from(days)));
        Ok(Digest::from_records(&records, since))
    }

    /// Explains whether one message would be offered for deletion at the
    /// configured cutoff.
    pub async fn explain(&self, id: &MessageId) -> Result<Explanation> {
        let records = self.store.load().await?;
        let record = records
            .get(id)
            .cloned()
            .ok_or_else(|| TriageError::UnknownMessage(id.clone()))?;
        let check = self.policy.check_deletion(
            &record.message,
            record.analysis.as_ref(),
            self.config().deletion_cutoff,
            Utc::now(),
        );
        Ok(Explanation { record, check })
    }
}
