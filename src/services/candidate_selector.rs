//! Deletion candidate selection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use super::safety_policy::SafetyPolicy;
use crate::config::ConfigError;
use crate::domain::{AnalysisResult, Message, RecordSet};

/// A message eligible for cleanup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub message: Message,
    pub analysis: AnalysisResult,
}

/// Picks the most disposable analyzed messages.
///
/// Read-only over the record set.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    policy: Arc<SafetyPolicy>,
}

impl CandidateSelector {
    pub fn new(policy: Arc<SafetyPolicy>) -> Self {
        Self { policy }
    }

    /// Returns up to `limit` analyzed, unprotected messages scoring below
    /// `min_score`.
    ///
    /// Ordered by score, then received time, then id, all ascending.
    pub fn select(
        &self,
        records: &RecordSet,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<Candidate>, ConfigError> {
        self.select_at(records, min_score, limit, Utc::now())
    }

    /// [`select`](Self::select) using the configured deletion cutoff.
    pub fn select_default(
        &self,
        records: &RecordSet,
        limit: usize,
    ) -> Result<Vec<Candidate>, ConfigError> {
        self.select(records, self.policy.config().deletion_cutoff, limit)
    }

    /// [`select`](Self::select) evaluated at `now`.
    pub fn select_at(
        &self,
        records: &RecordSet,
        min_score: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, ConfigError> {
        if !min_score.is_finite() {
            return Err(ConfigError::invalid("min_score", "must be a finite number"));
        }
        if limit == 0 {
            return Err(ConfigError::invalid("limit", "must be at least 1"));
        }

        let mut candidates: Vec<Candidate> = records
            .iter()
            .filter_map(|record| {
                let analysis = record.analysis.as_ref()?;
                self.policy
                    .check_deletion(&record.message, Some(analysis), min_score, now)
                    .is_deletable()
                    .then(|| Candidate {
                        message: record.message.clone(),
                        analysis: analysis.clone(),
                    })
            })
            .collect();

        candidates.sort_by(compare);
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.analysis
        .score
        .total_cmp(&b.analysis.score)
        .then_with(|| a.message.received_at.cmp(&b.message.received_at))
        .then_with(|| a.message.id.cmp(&b.message.id))
}
