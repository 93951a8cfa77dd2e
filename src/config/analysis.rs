//! Analysis configuration.
//!
//! [`AnalysisConfig`] is loaded once per process and handed to the safety
//! policy, the analysis orchestrator and the candidate selector. Nothing
//! reads it through global state.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ConfigError;
use crate::domain::{Category, TierThresholds};

/// Scoring thresholds, batching and safety rules for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Score-to-tier table.
    pub tiers: TierThresholds,
    /// Maximum messages submitted to the scorer per batch.
    pub batch_size: usize,
    /// Default score below which a message becomes a deletion candidate.
    pub deletion_cutoff: f64,
    /// Classifier categories that always trigger a safety override.
    pub protected_categories: BTreeSet<Category>,
    /// Sender and subject rules per protected class.
    pub safety_rules: SafetyRules,
    /// Addresses that are never deletion candidates.
    pub vip_senders: Vec<String>,
    /// Domains whose senders are never deletion candidates.
    pub vip_domains: Vec<String>,
    /// When existing analyses are considered stale and re-scored.
    pub staleness: StalenessPolicy,
    /// Messages younger than this are never candidates. Zero disables it.
    pub min_message_age_hours: u32,
    /// Also ask the summarizer for a short summary of each scored message.
    pub enable_summarization: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tiers: TierThresholds::default(),
            batch_size: 10,
            deletion_cutoff: -2.0,
            protected_categories: [Category::Security, Category::Financial, Category::Medical]
                .into_iter()
                .collect(),
            safety_rules: SafetyRules::default(),
            vip_senders: Vec::new(),
            vip_domains: Vec::new(),
            staleness: StalenessPolicy::default(),
            min_message_age_hours: 0,
            enable_summarization: false,
        }
    }
}

impl AnalysisConfig {
    /// Checks every value and rule pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if !self.deletion_cutoff.is_finite() {
            return Err(ConfigError::invalid(
                "deletion_cutoff",
                "must be a finite number",
            ));
        }
        if !self.tiers.is_well_ordered() {
            return Err(ConfigError::invalid(
                "tiers",
                "bounds must be finite and strictly descending (critical > high > medium > low)",
            ));
        }
        if self.staleness.max_age_days == Some(0) {
            return Err(ConfigError::invalid(
                "staleness.max_age_days",
                "must be at least 1 when set",
            ));
        }
        for (class, rules) in self.safety_rules.classes() {
            for pattern in &rules.subject_patterns {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::Pattern {
                        class: class.as_str(),
                        pattern: pattern.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }
}

/// Re-analysis policy for messages that already carry an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessPolicy {
    /// Analyses older than this many days are re-scored. `None` means never.
    pub max_age_days: Option<u32>,
}

impl StalenessPolicy {
    pub fn max_age(&self) -> Option<chrono::Duration> {
        self.max_age_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }
}

/// Rule sets for the protected message classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyRules {
    pub security: ClassRules,
    pub financial: ClassRules,
    pub medical: ClassRules,
}

impl SafetyRules {
    /// Rule sets paired with the category each one protects, in evaluation order.
    pub fn classes(&self) -> [(Category, &ClassRules); 3] {
        [
            (Category::Security, &self.security),
            (Category::Financial, &self.financial),
            (Category::Medical, &self.medical),
        ]
    }
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            security: ClassRules::new(
                &["accounts.google.com", "id.apple.com", "login.microsoftonline.com"],
                &["security@", "security-noreply@", "account-security"],
                &[
                    r"\bpassword\b",
                    r"\bsecurity (alert|notice|code)\b",
                    r"\bverification code\b",
                    r"\bverify your\b",
                    r"\b(two|2)[- ]?(factor|step)\b",
                    r"\b2fa\b",
                    r"\bsign[- ]?in (attempt|alert)\b",
                    r"\bnew (device|login)\b",
                    r"\bsuspicious (activity|sign[- ]?in)\b",
                ],
            ),
            financial: ClassRules::new(
                &["paypal.com", "chase.com", "wellsfargo.com", "bankofamerica.com", "irs.gov"],
                &["billing@", "payments@", "statements@"],
                &[
                    r"\bbank(ing)?\b",
                    r"\bpayment (received|due|failed|confirmation)\b",
                    r"\binvoice\b",
                    r"\bstatement (is )?(ready|available)\b",
                    r"\btax (return|document|form)\b",
                    r"\bwire transfer\b",
                    r"\brefund\b",
                ],
            ),
            medical: ClassRules::new(
                &["mychart.com"],
                &["patient", "pharmacy"],
                &[
                    r"\b(lab|test) results?\b",
                    r"\bprescription\b",
                    r"\bappointment (reminder|confirmation)\b",
                    r"\bpatient portal\b",
                ],
            ),
        }
    }
}

/// Sender and subject rules for one protected class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassRules {
    /// Sender domains; subdomains match too.
    pub sender_domains: Vec<String>,
    /// Case-insensitive fragments of the sender address.
    pub sender_patterns: Vec<String>,
    /// Case-insensitive regular expressions matched against the subject.
    pub subject_patterns: Vec<String>,
}

impl ClassRules {
    fn new(domains: &[&str], senders: &[&str], subjects: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            sender_domains: owned(domains),
            sender_patterns: owned(senders),
            subject_patterns: owned(subjects),
        }
    }
}
