//! Safety rules that keep important mail out of cleanup.
//!
//! The policy is evaluated before a message is scored and again on the
//! classifier's answer. A positive verdict can only add protection; nothing
//! the classifier returns can remove it.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::{AnalysisConfig, ClassRules, ConfigError};
use crate::domain::{AnalysisResult, Category, Message};

/// Result of evaluating the policy against one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyVerdict {
    /// Whether the message must never be offered for deletion.
    pub safety_override: bool,
    /// Category implied by the matching rule, if any.
    pub forced_category: Option<Category>,
    /// Human-readable explanation of the match.
    pub reason: Option<String>,
}

impl SafetyVerdict {
    fn protected(category: Category, reason: String) -> Self {
        Self {
            safety_override: true,
            forced_category: Some(category),
            reason: Some(reason),
        }
    }
}

/// Why a message is or is not deletable.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionCheck {
    Deletable { score: f64, cutoff: f64 },
    NotAnalyzed,
    Protected { reason: String },
    AboveCutoff { score: f64, cutoff: f64 },
    TooRecent { age_hours: i64, min_hours: u32 },
}

impl DeletionCheck {
    pub fn is_deletable(&self) -> bool {
        matches!(self, DeletionCheck::Deletable { .. })
    }
}

impl fmt::Display for DeletionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionCheck::Deletable { score, cutoff } => {
                write!(f, "deletable: score {score:.1} is below {cutoff:.1}")
            }
            DeletionCheck::NotAnalyzed => f.write_str("kept: not analyzed yet"),
            DeletionCheck::Protected { reason } => write!(f, "kept: protected ({reason})"),
            DeletionCheck::AboveCutoff { score, cutoff } => {
                write!(f, "kept: score {score:.1} is not below {cutoff:.1}")
            }
            DeletionCheck::TooRecent {
                age_hours,
                min_hours,
            } => write!(
                f,
                "kept: received {age_hours}h ago, younger than {min_hours}h"
            ),
        }
    }
}

#[derive(Debug)]
struct CompiledClass {
    category: Category,
    sender_domains: Vec<String>,
    sender_patterns: Vec<String>,
    subject_patterns: Vec<Regex>,
}

impl CompiledClass {
    fn compile(category: Category, rules: &ClassRules) -> Result<Self, ConfigError> {
        let lowered = |items: &[String]| {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        };
        let subject_patterns = rules
            .subject_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::Pattern {
                        class: category.as_str(),
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            category,
            sender_domains: lowered(&rules.sender_domains),
            sender_patterns: lowered(&rules.sender_patterns),
            subject_patterns,
        })
    }

    fn matches(&self, address: &str, domain: Option<&str>, subject: &str) -> Option<String> {
        if let Some(domain) = domain {
            if let Some(rule) = self.sender_domains.iter().find(|d| domain_matches(domain, d)) {
                return Some(format!("sender domain matches {} rule {rule}", self.category));
            }
        }
        if let Some(rule) = self.sender_patterns.iter().find(|p| address.contains(p.as_str())) {
            return Some(format!("sender matches {} rule {rule}", self.category));
        }
        self.subject_patterns
            .iter()
            .find(|re| re.is_match(subject))
            .map(|re| format!("subject matches {} pattern {}", self.category, re.as_str()))
    }
}

/// `domain` equals `rule` or is one of its subdomains.
fn domain_matches(domain: &str, rule: &str) -> bool {
    domain == rule
        || domain
            .strip_suffix(rule)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Compiled safety rules.
#[derive(Debug)]
pub struct SafetyPolicy {
    config: Arc<AnalysisConfig>,
    classes: Vec<CompiledClass>,
    vip_senders: BTreeSet<String>,
    vip_domains: Vec<String>,
}

impl SafetyPolicy {
    /// Compiles the rules in `config`.
    pub fn new(config: Arc<AnalysisConfig>) -> Result<Self, ConfigError> {
        let classes = config
            .safety_rules
            .classes()
            .into_iter()
            .map(|(category, rules)| CompiledClass::compile(category, rules))
            .collect::<Result<Vec<_>, _>>()?;

        let vip_senders = config
            .vip_senders
            .iter()
            .map(|s| s.trim().to_lowercase())
            .collect();
        let vip_domains = config
            .vip_domains
            .iter()
            .map(|s| s.trim().trim_start_matches('@').to_lowercase())
            .collect();

        Ok(Self {
            config,
            classes,
            vip_senders,
            vip_domains,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Evaluates the sender and subject rules.
    ///
    /// Protected classes are checked in order (security, financial, medical),
    /// then the VIP lists. The first match wins.
    pub fn evaluate(&self, message: &Message) -> SafetyVerdict {
        let address = message.sender_address();
        let domain = message.sender_domain();

        for class in &self.classes {
            if let Some(reason) = class.matches(&address, domain.as_deref(), &message.subject) {
                return SafetyVerdict::protected(class.category, reason);
            }
        }

        if self.vip_senders.contains(&address) {
            return SafetyVerdict::protected(Category::Personal, "sender is a VIP".to_string());
        }
        if let Some(domain) = domain.as_deref() {
            if let Some(vip) = self.vip_domains.iter().find(|d| domain_matches(domain, d)) {
                return SafetyVerdict::protected(
                    Category::Personal,
                    format!("sender domain {vip} is a VIP domain"),
                );
            }
        }

        SafetyVerdict::default()
    }

    /// Combines the rule verdict with the classifier's category.
    ///
    /// A rule match supplies the category. Otherwise a classifier category
    /// listed as protected still sets the override.
    pub fn adjudicate(&self, message: &Message, classifier_category: Category) -> SafetyVerdict {
        self.apply_category(self.evaluate(message), classifier_category)
    }

    /// Second half of [`adjudicate`](Self::adjudicate), for callers that
    /// evaluated the rules before scoring.
    pub fn apply_category(
        &self,
        verdict: SafetyVerdict,
        classifier_category: Category,
    ) -> SafetyVerdict {
        if verdict.safety_override {
            return verdict;
        }
        if self.config.protected_categories.contains(&classifier_category) {
            return SafetyVerdict {
                safety_override: true,
                forced_category: None,
                reason: Some(format!("category {classifier_category} is protected")),
            };
        }
        verdict
    }

    /// Explains whether `message` may be offered for deletion below `cutoff`.
    ///
    /// Rules are re-evaluated here so a rule added after scoring still
    /// protects the message.
    pub fn check_deletion(
        &self,
        message: &Message,
        analysis: Option<&AnalysisResult>,
        cutoff: f64,
        now: DateTime<Utc>,
    ) -> DeletionCheck {
        let Some(analysis) = analysis else {
            return DeletionCheck::NotAnalyzed;
        };

        if analysis.safety_override {
            let reason = analysis
                .safety_reason
                .clone()
                .unwrap_or_else(|| "safety override".to_string());
            return DeletionCheck::Protected { reason };
        }
        let verdict = self.evaluate(message);
        if verdict.safety_override {
            return DeletionCheck::Protected {
                reason: verdict.reason.unwrap_or_default(),
            };
        }

        if analysis.score.is_nan() || analysis.score >= cutoff {
            return DeletionCheck::AboveCutoff {
                score: analysis.score,
                cutoff,
            };
        }

        let min_hours = self.config.min_message_age_hours;
        if min_hours > 0 {
            let age_hours = (now - message.received_at).num_hours();
            if age_hours < i64::from(min_hours) {
                return DeletionCheck::TooRecent {
                    age_hours,
                    min_hours,
                };
            }
        }

        DeletionCheck::Deletable {
            score: analysis.score,
            cutoff,
        }
    }
}
