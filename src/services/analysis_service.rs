//! Batch analysis orchestrator.
//!
//! Drives the scoring port over every unanalyzed or stale message in
//! bounded batches, applies the safety policy to each answer and saves the
//! record set after every batch.
//!
//! # Failure handling
//!
//! - A message the scorer could not handle stays unanalyzed and is recorded
//!   in the outcome log. The batch and the run continue.
//! - A batch that exceeds its timeout is treated as if every message in it
//!   had timed out.
//! - A scorer failure that affects the whole batch aborts the run. Batches
//!   saved before it stay saved.
//! - A failed save aborts the run. The previous document stays intact
//!   because saves are atomic.
//! - A failed or timed-out summary leaves the message scored without one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::safety_policy::{SafetyPolicy, SafetyVerdict};
use crate::config::ConfigError;
use crate::domain::{
    AnalysisResult, ImportanceTier, Message, MessageId, MessageSummary, RecordSet,
};
use crate::providers::scoring::{
    ScoreFailure, ScoreOutcome, ScoringError, ScoringPort, SummaryPort,
};
use crate::storage::{RecordStore, StorageError};

/// Default upper bound for one batch, including every call inside it.
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(900);

/// Errors that abort an analysis run.
///
/// Each variant reports how many messages were analyzed and saved before
/// the failure, so a re-run resumes from there.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid analysis configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("scoring failed on batch {batch_index} ({persisted} messages analyzed and saved before it): {source}")]
    Transport {
        batch_index: usize,
        persisted: usize,
        #[source]
        source: ScoringError,
    },

    #[error("saving batch {batch_index} failed ({persisted} messages analyzed and saved before it): {source}")]
    Storage {
        batch_index: usize,
        persisted: usize,
        #[source]
        source: StorageError,
    },
}

impl AnalysisError {
    /// Messages analyzed and saved before the run stopped.
    pub fn persisted(&self) -> usize {
        match self {
            AnalysisError::Config(_) => 0,
            AnalysisError::Transport { persisted, .. } | AnalysisError::Storage { persisted, .. } => {
                *persisted
            }
        }
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Scored {
        score: f64,
        tier: ImportanceTier,
        safety_override: bool,
    },
    Failed {
        reason: ScoreFailure,
    },
}

/// One entry of the outcome log; also the progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    pub batch_index: usize,
    pub message_id: MessageId,
    pub outcome: Outcome,
}

impl MessageOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

/// Receives progress events.
///
/// Called synchronously from the run, once per message. Implementations
/// must return promptly or they stall the analysis.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &MessageOutcome);
}

impl<F> ProgressObserver for F
where
    F: Fn(&MessageOutcome) + Send + Sync,
{
    fn on_event(&self, event: &MessageOutcome) {
        self(event)
    }
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &MessageOutcome) {}
}

/// Logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &MessageOutcome) {
        match &event.outcome {
            Outcome::Scored {
                score,
                tier,
                safety_override,
            } => info!(
                batch_index = event.batch_index,
                message_id = %event.message_id,
                score,
                %tier,
                safety_override,
                "Message analyzed"
            ),
            Outcome::Failed { reason } => warn!(
                batch_index = event.batch_index,
                message_id = %event.message_id,
                %reason,
                "Message not analyzed"
            ),
        }
    }
}

/// Forwards events to broadcast subscribers.
///
/// Sending never blocks; lagging subscribers miss events.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: broadcast::Sender<MessageOutcome>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MessageOutcome> {
        self.sender.subscribe()
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &MessageOutcome) {
        let _ = self.sender.send(event.clone());
    }
}

/// Summary of a completed (or cancelled) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    /// Messages selected for analysis.
    pub selected: usize,
    /// Batches that ran to completion.
    pub batches_completed: usize,
    /// Messages analyzed and saved.
    pub analyzed: usize,
    /// Messages that could not be scored.
    pub failed: usize,
    /// Analyzed messages that also received a summary.
    pub summarized: usize,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
    pub outcomes: Vec<MessageOutcome>,
}

impl AnalysisReport {
    fn new(selected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            selected,
            batches_completed: 0,
            analyzed: 0,
            failed: 0,
            summarized: 0,
            cancelled: false,
            outcomes: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &MessageOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }
}

/// Runs analysis over a record set.
pub struct AnalysisService<S: RecordStore> {
    store: Arc<S>,
    scorer: Arc<dyn ScoringPort>,
    summarizer: Option<Arc<dyn SummaryPort>>,
    policy: Arc<SafetyPolicy>,
    batch_timeout: Duration,
}

impl<S: RecordStore> AnalysisService<S> {
    pub fn new(store: Arc<S>, scorer: Arc<dyn ScoringPort>, policy: Arc<SafetyPolicy>) -> Self {
        Self {
            store,
            scorer,
            summarizer: None,
            policy,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    /// Summarizer used when `enable_summarization` is set in the config.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn SummaryPort>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Messages that need scoring, oldest first.
    ///
    /// A message qualifies when it has no analysis or when its analysis is
    /// older than the staleness policy allows.
    pub fn pending(&self, records: &RecordSet, now: DateTime<Utc>) -> Vec<Message> {
        let max_age = self.policy.config().staleness.max_age();
        let mut pending: Vec<Message> = records
            .iter()
            .filter(|record| match (&record.analysis, max_age) {
                (None, _) => true,
                (Some(analysis), Some(max_age)) => analysis.is_older_than(max_age, now),
                (Some(_), None) => false,
            })
            .map(|record| record.message.clone())
            .collect();

        pending.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        pending
    }

    /// Analyzes every pending message in batches of at most `batch_size`.
    ///
    /// `records` is updated in place and saved after each batch that
    /// produced at least one analysis. Cancellation is checked before each
    /// batch; a batch already in flight always completes and is saved.
    pub async fn analyze(
        &self,
        records: &mut RecordSet,
        batch_size: usize,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, AnalysisError> {
        let config = self.policy.config();
        config.validate()?;
        if batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1").into());
        }

        let summarizer: Option<&dyn SummaryPort> =
            match (&self.summarizer, config.enable_summarization) {
                (Some(summarizer), true) => Some(summarizer.as_ref()),
                (None, true) => {
                    warn!("Summarization is enabled but no summarizer is configured");
                    None
                }
                (_, false) => None,
            };

        let pending = self.pending(records, Utc::now());
        let mut report = AnalysisReport::new(pending.len());
        let run_id = report.run_id;

        info!(
            %run_id,
            pending = pending.len(),
            batch_size,
            scorer = self.scorer.name(),
            "Starting analysis run"
        );

        for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!(%run_id, batch_index, "Analysis cancelled before batch");
                report.cancelled = true;
                break;
            }

            let verdicts: Vec<SafetyVerdict> =
                batch.iter().map(|m| self.policy.evaluate(m)).collect();
            debug!(
                %run_id,
                batch_index,
                size = batch.len(),
                protected = verdicts.iter().filter(|v| v.safety_override).count(),
                "Scoring batch"
            );

            let outcomes = match self.score(batch).await {
                Ok(outcomes) => outcomes,
                Err(source) => {
                    warn!(%run_id, batch_index, error = %source, "Scoring service failed; aborting run");
                    return Err(AnalysisError::Transport {
                        batch_index,
                        persisted: report.analyzed,
                        source,
                    });
                }
            };

            let mut summaries = match summarizer {
                Some(summarizer) => {
                    let scored_ok: Vec<Message> = batch
                        .iter()
                        .zip(&outcomes)
                        .filter(|(_, outcome)| matches!(outcome, Ok(score) if score.score.is_finite()))
                        .map(|(message, _)| message.clone())
                        .collect();
                    self.summarize(summarizer, &scored_ok).await
                }
                None => HashMap::new(),
            };

            let mut scored = 0;
            let mut summarized = 0;
            for ((message, verdict), outcome) in batch.iter().zip(verdicts).zip(outcomes) {
                let outcome = match outcome {
                    Ok(score) if !score.score.is_finite() => Outcome::Failed {
                        reason: ScoreFailure::NonFiniteScore,
                    },
                    Ok(score) => {
                        let verdict = self.policy.apply_category(verdict, score.category);
                        let analysis = AnalysisResult {
                            score: score.score,
                            tier: self.policy.config().tiers.tier_for(score.score),
                            rationale: score.rationale,
                            category: verdict.forced_category.unwrap_or(score.category),
                            safety_override: verdict.safety_override,
                            safety_reason: verdict.reason,
                            scored_by: Some(self.scorer.name().to_string()),
                            summary: summaries.remove(&message.id),
                            analyzed_at: Utc::now(),
                        };
                        let outcome = Outcome::Scored {
                            score: analysis.score,
                            tier: analysis.tier,
                            safety_override: analysis.safety_override,
                        };
                        let has_summary = analysis.summary.is_some();
                        if records.set_analysis(&message.id, analysis) {
                            scored += 1;
                            if has_summary {
                                summarized += 1;
                            }
                        }
                        outcome
                    }
                    Err(reason) => Outcome::Failed { reason },
                };

                let entry = MessageOutcome {
                    batch_index,
                    message_id: message.id.clone(),
                    outcome,
                };
                if entry.is_failure() {
                    report.failed += 1;
                }
                observer.on_event(&entry);
                report.outcomes.push(entry);
            }

            if scored > 0 {
                records.set_last_analysis(Utc::now());
                if let Err(source) = self.store.save(records).await {
                    warn!(%run_id, batch_index, error = %source, "Saving batch failed; aborting run");
                    return Err(AnalysisError::Storage {
                        batch_index,
                        persisted: report.analyzed,
                        source,
                    });
                }
            }
            report.analyzed += scored;
            report.summarized += summarized;
            report.batches_completed += 1;
        }

        info!(
            %run_id,
            analyzed = report.analyzed,
            failed = report.failed,
            summarized = report.summarized,
            batches = report.batches_completed,
            cancelled = report.cancelled,
            "Analysis run finished"
        );
        Ok(report)
    }

    /// Summaries for `messages`, keyed by id. Failures are logged and left out.
    async fn summarize(
        &self,
        summarizer: &dyn SummaryPort,
        messages: &[Message],
    ) -> HashMap<MessageId, MessageSummary> {
        if messages.is_empty() {
            return HashMap::new();
        }

        let answers =
            match tokio::time::timeout(self.batch_timeout, summarizer.summarize_batch(messages))
                .await
            {
                Ok(answers) => answers,
                Err(_) => {
                    warn!(
                        size = messages.len(),
                        timeout = ?self.batch_timeout,
                        "Summaries timed out; keeping scores without them"
                    );
                    return HashMap::new();
                }
            };

        answers
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Ok(summary) => Some((id, summary)),
                Err(reason) => {
                    warn!(message_id = %id, %reason, "Summary failed; keeping the score");
                    None
                }
            })
            .collect()
    }

    /// Scores one batch and lines the answers up with the input.
    async fn score(&self, batch: &[Message]) -> Result<Vec<ScoreOutcome>, ScoringError> {
        let answers = match tokio::time::timeout(self.batch_timeout, self.scorer.score_batch(batch))
            .await
        {
            Ok(answers) => answers?,
            Err(_) => {
                warn!(size = batch.len(), timeout = ?self.batch_timeout, "Batch timed out");
                return Ok(batch
                    .iter()
                    .map(|_| Err(ScoreFailure::Timeout(self.batch_timeout)))
                    .collect());
            }
        };

        let mut by_id: HashMap<MessageId, ScoreOutcome> = HashMap::with_capacity(answers.len());
        for (id, outcome) in answers {
            if by_id.contains_key(&id) {
                warn!(message_id = %id, "Scorer returned a duplicate outcome; keeping the first");
                continue;
            }
            by_id.insert(id, outcome);
        }

        let aligned = batch
            .iter()
            .map(|m| by_id.remove(&m.id).unwrap_or(Err(ScoreFailure::MissingOutcome)))
            .collect();
        for id in by_id.keys() {
            warn!(message_id = %id, "Scorer returned an outcome for a message not in the batch");
        }
        Ok(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::domain::{Category, Record, Sentiment};
    use crate::providers::scoring::{Score, SummaryOutcome};
    use crate::storage::MemoryRecordStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;

    /// Scores by subject: "fail" fails, "slow" hangs, "inf" is non-finite,
    /// otherwise the score is parsed from the subject's last word.
    #[derive(Default)]
    struct FakeScorer {
        calls: Mutex<Vec<Vec<MessageId>>>,
        unreachable_on_call: Option<usize>,
        drop_outcomes: bool,
    }

    impl FakeScorer {
        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ScoringPort for FakeScorer {
        fn name(&self) -> &str {
            "fake"
        }

        async fn score_batch(
            &self,
            batch: &[Message],
        ) -> Result<Vec<(MessageId, ScoreOutcome)>, ScoringError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(batch.iter().map(|m| m.id.clone()).collect());
                calls.len() - 1
            };
            if self.unreachable_on_call == Some(call) {
                return Err(ScoringError::Unreachable("connection refused".to_string()));
            }
            if batch.iter().any(|m| m.subject == "slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }

            let mut outcomes: Vec<(MessageId, ScoreOutcome)> = batch
                .iter()
                .map(|m| {
                    let outcome = match m.subject.as_str() {
                        "fail" => Err(ScoreFailure::InvalidResponse("garbled".to_string())),
                        "inf" => Ok(Score::new(f64::INFINITY, Category::Other, "")),
                        subject => {
                            let score = subject
                                .rsplit(' ')
                                .next()
                                .and_then(|s| s.parse().ok())
                                .unwrap_or(0.0);
                            Ok(Score::new(score, Category::Promotional, "fake"))
                        }
                    };
                    (m.id.clone(), outcome)
                })
                .collect();
            // Answer out of order; the orchestrator must realign.
            outcomes.reverse();
            if self.drop_outcomes {
                outcomes.pop();
            }
            Ok(outcomes)
        }
    }

    /// Summarizes by subject; subjects starting with "nosum" fail.
    #[derive(Default)]
    struct FakeSummarizer {
        calls: Mutex<Vec<Vec<MessageId>>>,
    }

    #[async_trait]
    impl SummaryPort for FakeSummarizer {
        async fn summarize_batch(&self, batch: &[Message]) -> Vec<(MessageId, SummaryOutcome)> {
            self.calls
                .lock()
                .unwrap()
                .push(batch.iter().map(|m| m.id.clone()).collect());
            batch
                .iter()
                .map(|m| {
                    let outcome = if m.subject.starts_with("nosum") {
                        Err(ScoreFailure::InvalidResponse("empty".to_string()))
                    } else {
                        Ok(MessageSummary {
                            sentiment: Some(Sentiment::Neutral),
                            ..MessageSummary::new(format!("About {}", m.subject))
                        })
                    };
                    (m.id.clone(), outcome)
                })
                .collect()
        }
    }

    /// Fails every save after the first `ok_saves`.
    struct FlakyStore {
        inner: MemoryRecordStore,
        ok_saves: usize,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn load(&self) -> crate::storage::Result<RecordSet> {
            self.inner.load().await
        }

        async fn save(&self, records: &RecordSet) -> crate::storage::Result<()> {
            if self.inner.save_count() >= self.ok_saves {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            self.inner.save(records).await
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn records(subjects: &[(&str, &str, u32)]) -> RecordSet {
        RecordSet::from_messages(
            subjects
                .iter()
                .map(|(id, subject, hour)| Message::new(*id, "deals@shop.example", *subject, at(*hour))),
        )
    }

    fn policy(config: AnalysisConfig) -> Arc<SafetyPolicy> {
        Arc::new(SafetyPolicy::new(Arc::new(config)).unwrap())
    }

    fn service<S: RecordStore>(store: Arc<S>, scorer: Arc<FakeScorer>) -> AnalysisService<S> {
        AnalysisService::new(store, scorer, policy(AnalysisConfig::default()))
    }

    #[tokio::test]
    async fn analyzes_in_batches_and_saves_each() {
        let store = Arc::new(MemoryRecordStore::new());
        let scorer = Arc::new(FakeScorer::default());
        let mut set = records(&[
            ("c", "sale -3", 3),
            ("a", "digest 1", 1),
            ("b", "party 6", 2),
        ]);

        let report = service(store.clone(), scorer.clone())
            .analyze(&mut set, 2, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.analyzed, 3);
        assert_eq!(report.batches_completed, 2);
        assert_eq!(store.save_count(), 2);
        // Oldest first.
        let calls = scorer.calls.lock().unwrap().clone();
        assert_eq!(calls[0], vec![MessageId::from("a"), MessageId::from("b")]);
        assert_eq!(calls[1], vec![MessageId::from("c")]);

        let saved = store.load().await.unwrap();
        assert_eq!(saved.analyzed_count(), 3);
        let c = saved.get(&MessageId::from("c")).unwrap().analysis.clone().unwrap();
        assert_eq!(c.score, -3.0);
        assert_eq!(c.tier, ImportanceTier::Low);
        assert_eq!(c.scored_by.as_deref(), Some("fake"));
        assert!(saved.last_analysis().is_some());
    }

    #[tokio::test]
    async fn failed_message_stays_unanalyzed() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut set = records(&[("1", "sale -1", 1), ("2", "fail", 2), ("3", "news 2", 3)]);

        let report = service(store, Arc::new(FakeScorer::default()))
            .analyze(&mut set, 10, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.analyzed, 2);
        assert_eq!(report.failed, 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message_id, MessageId::from("2"));
        assert!(!set.get(&MessageId::from("2")).unwrap().is_analyzed());
        assert!(set.get(&MessageId::from("3")).unwrap().is_analyzed());
    }

    #[tokio::test]
    async fn outcome_log_follows_input_order() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut set = records(&[("1", "a 1", 1), ("2", "b 2", 2), ("3", "c 3", 3)]);

        let report = service(store, Arc::new(FakeScorer::default()))
            .analyze(&mut set, 3, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.message_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn missing_and_non_finite_outcomes_are_failures() {
        let store = Arc::new(MemoryRecordStore::new());
        let scorer = Arc::new(FakeScorer {
            drop_outcomes: true,
            ..FakeScorer::default()
        });
        // Outcomes come back reversed and the last one (for "1") is dropped.
        let mut set = records(&[("1", "a 1", 1), ("2", "inf", 2), ("3", "c 3", 3)]);

        let report = service(store, scorer)
            .analyze(&mut set, 3, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        let reasons: Vec<_> = report
            .failures()
            .map(|o| (o.message_id.as_str().to_string(), o.outcome.clone()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (
                    "1".to_string(),
                    Outcome::Failed {
                        reason: ScoreFailure::MissingOutcome
                    }
                ),
                (
                    "2".to_string(),
                    Outcome::Failed {
                        reason: ScoreFailure::NonFiniteScore
                    }
                ),
            ]
        );
        assert_eq!(set.analyzed_count(), 1);
    }

    #[tokio::test]
    async fn safety_override_survives_low_score() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut set = RecordSet::from_messages([Message::new(
            "reset",
            "deals@shop.example",
            "Password reset -9",
            at(1),
        )]);

        service(store, Arc::new(FakeScorer::default()))
            .analyze(&mut set, 5, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        let analysis = set.get(&MessageId::from("reset")).unwrap().analysis.clone().unwrap();
        assert_eq!(analysis.score, -9.0);
        assert!(analysis.safety_override);
        assert_eq!(analysis.category, Category::Security);
        assert!(analysis.safety_reason.unwrap().contains("security"));
    }

    #[tokio::test]
    async fn protected_classifier_category_sets_override() {
        let config = AnalysisConfig {
            protected_categories: [Category::Promotional].into_iter().collect(),
            ..AnalysisConfig::default()
        };
        let service = AnalysisService::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(FakeScorer::default()),
            policy(config),
        );
        let mut set = records(&[("1", "sale -4", 1)]);

        service
            .analyze(&mut set, 5, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        let analysis = set.get(&MessageId::from("1")).unwrap().analysis.clone().unwrap();
        assert!(analysis.safety_override);
        assert_eq!(analysis.category, Category::Promotional);
    }

    #[tokio::test]
    async fn transport_failure_keeps_earlier_batches() {
        let store = Arc::new(MemoryRecordStore::new());
        let scorer = Arc::new(FakeScorer {
            unreachable_on_call: Some(1),
            ..FakeScorer::default()
        });
        let mut set = records(&[("1", "a 1", 1), ("2", "b 2", 2), ("3", "c 3", 3)]);

        let err = service(store.clone(), scorer)
            .analyze(&mut set, 2, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Transport { batch_index: 1, .. }));
        assert_eq!(err.persisted(), 2);
        let saved = store.load().await.unwrap();
        assert_eq!(saved.analyzed_count(), 2);
        assert!(!saved.get(&MessageId::from("3")).unwrap().is_analyzed());
    }

    #[tokio::test]
    async fn storage_failure_reports_progress() {
        let store = Arc::new(FlakyStore {
            inner: MemoryRecordStore::new(),
            ok_saves: 1,
        });
        let mut set = records(&[("1", "a 1", 1), ("2", "b 2", 2), ("3", "c 3", 3)]);

        let err = service(store.clone(), Arc::new(FakeScorer::default()))
            .analyze(&mut set, 2, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Storage { batch_index: 1, .. }));
        assert_eq!(err.persisted(), 2);
        assert_eq!(store.load().await.unwrap().analyzed_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_timeout_fails_every_message_in_the_batch() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut set = records(&[("1", "slow", 1), ("2", "b 2", 2), ("3", "c 3", 3)]);

        let report = service(store, Arc::new(FakeScorer::default()))
            .with_batch_timeout(Duration::from_secs(5))
            .analyze(&mut set, 2, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.analyzed, 1);
        assert!(report.failures().all(|o| o.outcome
            == Outcome::Failed {
                reason: ScoreFailure::Timeout(Duration::from_secs(5))
            }));
        assert!(set.get(&MessageId::from("3")).unwrap().is_analyzed());
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_batch() {
        let store = Arc::new(MemoryRecordStore::new());
        let scorer = Arc::new(FakeScorer::default());
        let cancel = CancellationToken::new();
        let observer = {
            let cancel = cancel.clone();
            move |_: &MessageOutcome| cancel.cancel()
        };
        let mut set = records(&[("1", "a 1", 1), ("2", "b 2", 2), ("3", "c 3", 3)]);

        let report = service(store.clone(), scorer.clone())
            .analyze(&mut set, 2, &observer, &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(scorer.call_count(), 1);
        // The in-flight batch completed and was saved.
        assert_eq!(report.analyzed, 2);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn stale_results_are_rescored_and_kept_on_failure() {
        let config = AnalysisConfig {
            staleness: crate::config::StalenessPolicy {
                max_age_days: Some(7),
            },
            ..AnalysisConfig::default()
        };
        let service = AnalysisService::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(FakeScorer::default()),
            policy(config),
        );

        let old = AnalysisResult {
            score: 4.0,
            tier: ImportanceTier::Medium,
            rationale: "old".to_string(),
            category: Category::Other,
            safety_override: false,
            safety_reason: None,
            scored_by: None,
            summary: None,
            analyzed_at: Utc::now() - ChronoDuration::days(30),
        };
        let fresh = AnalysisResult {
            analyzed_at: Utc::now(),
            ..old.clone()
        };
        let mut set = RecordSet::new();
        set.insert(Record::analyzed(
            Message::new("stale", "x@example.com", "news -1", at(1)),
            old.clone(),
        ));
        set.insert(Record::analyzed(
            Message::new("stale-fail", "x@example.com", "fail", at(2)),
            old.clone(),
        ));
        set.insert(Record::analyzed(
            Message::new("fresh", "x@example.com", "news -1", at(3)),
            fresh.clone(),
        ));

        let pending: Vec<String> = service
            .pending(&set, Utc::now())
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(pending, vec!["stale", "stale-fail"]);

        service
            .analyze(&mut set, 10, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        let score_of = |id: &str| set.get(&MessageId::from(id)).unwrap().analysis.clone().unwrap();
        assert_eq!(score_of("stale").score, -1.0);
        assert_eq!(score_of("stale-fail"), old);
        assert_eq!(score_of("fresh"), fresh);
    }

    #[tokio::test]
    async fn channel_observer_broadcasts_events() {
        let observer = ChannelObserver::new(16);
        let mut rx = observer.subscribe();
        let mut set = records(&[("1", "a 1", 1), ("2", "fail", 2)]);

        service(Arc::new(MemoryRecordStore::new()), Arc::new(FakeScorer::default()))
            .analyze(&mut set, 5, &observer, &CancellationToken::new())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message_id, MessageId::from("1"));
        assert!(!first.is_failure());
        assert!(second.is_failure());
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected_before_any_work() {
        let scorer = Arc::new(FakeScorer::default());
        let mut set = records(&[("1", "a 1", 1)]);
        let before = set.clone();

        let err = service(Arc::new(MemoryRecordStore::new()), scorer.clone())
            .analyze(&mut set, 0, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Config(_)));
        assert_eq!(set, before);
        assert_eq!(scorer.call_count(), 0);
    }

    #[tokio::test]
    async fn summaries_are_attached_when_enabled() {
        let config = AnalysisConfig {
            enable_summarization: true,
            ..AnalysisConfig::default()
        };
        let summarizer = Arc::new(FakeSummarizer::default());
        let service = AnalysisService::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(FakeScorer::default()),
            policy(config),
        )
        .with_summarizer(summarizer.clone());
        let mut set = records(&[("1", "digest 2", 1), ("2", "nosum 3", 2), ("3", "fail", 3)]);

        let report = service
            .analyze(&mut set, 10, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        // Only scored messages are summarized.
        let calls = summarizer.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec![MessageId::from("1"), MessageId::from("2")]]);
        assert_eq!(report.analyzed, 2);
        assert_eq!(report.summarized, 1);

        let first = set.get(&MessageId::from("1")).unwrap().analysis.clone().unwrap();
        assert_eq!(first.summary.unwrap().summary, "About digest 2");
        // A failed summary keeps the score.
        let second = set.get(&MessageId::from("2")).unwrap().analysis.clone().unwrap();
        assert_eq!(second.score, 3.0);
        assert!(second.summary.is_none());
    }

    #[tokio::test]
    async fn summarizer_is_not_called_when_disabled() {
        let summarizer = Arc::new(FakeSummarizer::default());
        let service = service(Arc::new(MemoryRecordStore::new()), Arc::new(FakeScorer::default()))
            .with_summarizer(summarizer.clone());
        let mut set = records(&[("1", "digest 2", 1)]);

        let report = service
            .analyze(&mut set, 10, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert!(summarizer.calls.lock().unwrap().is_empty());
        assert_eq!(report.summarized, 0);
        assert!(set.get(&MessageId::from("1")).unwrap().analysis.clone().unwrap().summary.is_none());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_work() {
        let mut config = AnalysisConfig::default();
        config.tiers.high = 9.0;
        let policy = Arc::new(SafetyPolicy::new(Arc::new(config)).unwrap());
        let scorer = Arc::new(FakeScorer::default());
        let store = Arc::new(MemoryRecordStore::new());
        let service = AnalysisService::new(store.clone(), scorer.clone(), policy);
        let mut set = records(&[("1", "a 1", 1)]);
        let before = set.clone();

        let err = service
            .analyze(&mut set, 5, &NoopObserver, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AnalysisError::Config(ConfigError::Invalid { field: "tiers", .. })
        ));
        assert_eq!(set, before);
        assert_eq!(scorer.call_count(), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn nothing_pending_is_a_no_op() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut set = RecordSet::new();

        let report = service(store.clone(), Arc::new(FakeScorer::default()))
            .analyze(&mut set, 5, &TracingObserver, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.selected, 0);
        assert_eq!(store.save_count(), 0);
    }
}
