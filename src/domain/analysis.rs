//! Analysis domain types.
//!
//! Represents the scoring outcome for one message together with the safety
//! adjudication applied on top of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content category assigned to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Promotional,
    Newsletter,
    Social,
    Security,
    Financial,
    Medical,
    Personal,
    Other,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 8] = [
        Category::Promotional,
        Category::Newsletter,
        Category::Social,
        Category::Security,
        Category::Financial,
        Category::Medical,
        Category::Personal,
        Category::Other,
    ];

    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Promotional => "promotional",
            Category::Newsletter => "newsletter",
            Category::Social => "social",
            Category::Security => "security",
            Category::Financial => "financial",
            Category::Medical => "medical",
            Category::Personal => "personal",
            Category::Other => "other",
        }
    }

    /// Returns a human-readable plural description for reports.
    pub fn description(&self) -> &'static str {
        match self {
            Category::Promotional => "promotional emails (sales, deals, marketing)",
            Category::Newsletter => "newsletters and subscriptions",
            Category::Social => "social media notifications",
            Category::Security => "security-related emails",
            Category::Financial => "financial notifications",
            Category::Medical => "medical communications",
            Category::Personal => "personal communications",
            Category::Other => "other emails",
        }
    }

    /// Parses a category leniently, mapping unknown labels to [`Category::Other`].
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// Importance tier derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportanceTier {
    Critical,
    High,
    Medium,
    Low,
    Spam,
}

impl ImportanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceTier::Critical => "CRITICAL",
            ImportanceTier::High => "HIGH",
            ImportanceTier::Medium => "MEDIUM",
            ImportanceTier::Low => "LOW",
            ImportanceTier::Spam => "SPAM",
        }
    }
}

impl fmt::Display for ImportanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered score cutoffs mapping a score to an [`ImportanceTier`].
///
/// A score lands in the first tier whose lower bound it meets; anything
/// below `low` is [`ImportanceTier::Spam`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            critical: 8.0,
            high: 5.0,
            medium: 0.0,
            low: -5.0,
        }
    }
}

impl TierThresholds {
    /// The threshold table, highest bound first.
    pub fn table(&self) -> [(f64, ImportanceTier); 4] {
        [
            (self.critical, ImportanceTier::Critical),
            (self.high, ImportanceTier::High),
            (self.medium, ImportanceTier::Medium),
            (self.low, ImportanceTier::Low),
        ]
    }

    /// Returns the tier for `score`.
    pub fn tier_for(&self, score: f64) -> ImportanceTier {
        self.table()
            .into_iter()
            .find(|(bound, _)| score >= *bound)
            .map(|(_, tier)| tier)
            .unwrap_or(ImportanceTier::Spam)
    }

    /// Whether every bound is finite and strictly descending.
    pub fn is_well_ordered(&self) -> bool {
        let table = self.table();
        table.iter().all(|(bound, _)| bound.is_finite())
            && table.windows(2).all(|pair| pair[0].0 > pair[1].0)
    }
}

/// Tone reported alongside a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Urgent,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Urgent => "urgent",
        }
    }

    /// Parses a model-supplied label; anything unrecognized is `None`.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "negative" => Some(Sentiment::Negative),
            "neutral" => Some(Sentiment::Neutral),
            "urgent" => Some(Sentiment::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One- or two-sentence digest of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urgency_indicators: Vec<String>,
}

impl MessageSummary {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            key_points: Vec::new(),
            sentiment: None,
            urgency_indicators: Vec::new(),
        }
    }
}

/// Scoring outcome for one message plus its safety adjudication.
///
/// Owned 1:1 by the record it is stored on; it carries no message id of its
/// own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Importance score; higher means more important. Unbounded.
    pub score: f64,
    /// Tier derived from `score` when the result was produced.
    pub tier: ImportanceTier,
    /// Classifier rationale.
    pub rationale: String,
    /// Content category.
    pub category: Category,
    /// When set, the message can never become a deletion candidate.
    pub safety_override: bool,
    /// Why the safety override was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_reason: Option<String>,
    /// Name of the scorer that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scored_by: Option<String>,
    /// Short summary, present when summarization was enabled and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MessageSummary>,
    /// When the analysis was produced.
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Whether the result is older than `max_age` at `now`.
    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.analyzed_at > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds_default_table() {
        let tiers = TierThresholds::default();
        assert_eq!(tiers.tier_for(9.5), ImportanceTier::Critical);
        assert_eq!(tiers.tier_for(8.0), ImportanceTier::Critical);
        assert_eq!(tiers.tier_for(7.9), ImportanceTier::High);
        assert_eq!(tiers.tier_for(5.0), ImportanceTier::High);
        assert_eq!(tiers.tier_for(0.0), ImportanceTier::Medium);
        assert_eq!(tiers.tier_for(-0.1), ImportanceTier::Low);
        assert_eq!(tiers.tier_for(-5.0), ImportanceTier::Low);
        assert_eq!(tiers.tier_for(-5.1), ImportanceTier::Spam);
    }

    #[test]
    fn tier_thresholds_are_configurable() {
        let tiers = TierThresholds {
            critical: 100.0,
            high: 50.0,
            medium: 10.0,
            low: 0.0,
        };
        assert_eq!(tiers.tier_for(60.0), ImportanceTier::High);
        assert_eq!(tiers.tier_for(-1.0), ImportanceTier::Spam);
    }

    #[test]
    fn tier_thresholds_ordering_check() {
        assert!(TierThresholds::default().is_well_ordered());

        let inverted = TierThresholds {
            critical: 1.0,
            high: 5.0,
            ..TierThresholds::default()
        };
        assert!(!inverted.is_well_ordered());

        let nan = TierThresholds {
            medium: f64::NAN,
            ..TierThresholds::default()
        };
        assert!(!nan.is_well_ordered());
    }

    #[test]
    fn category_parsing() {
        assert_eq!("Security".parse::<Category>(), Ok(Category::Security));
        assert_eq!(" newsletter ".parse::<Category>(), Ok(Category::Newsletter));
        assert!("automated".parse::<Category>().is_err());
        assert_eq!(Category::parse_lenient("automated"), Category::Other);
    }

    #[test]
    fn category_serialization() {
        assert_eq!(
            serde_json::to_string(&Category::Promotional).unwrap(),
            "\"promotional\""
        );
        let medical: Category = serde_json::from_str("\"medical\"").unwrap();
        assert_eq!(medical, Category::Medical);
    }

    #[test]
    fn tier_serialization() {
        assert_eq!(
            serde_json::to_string(&ImportanceTier::Critical).unwrap(),
            "\"CRITICAL\""
        );
        let spam: ImportanceTier = serde_json::from_str("\"SPAM\"").unwrap();
        assert_eq!(spam, ImportanceTier::Spam);
    }

    #[test]
    fn summary_is_optional_in_stored_results() {
        let json = r#"{
            "score": 2.0,
            "tier": "MEDIUM",
            "rationale": "",
            "category": "other",
            "safety_override": false,
            "analyzed_at": "2024-01-01T00:00:00Z"
        }"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert!(result.summary.is_none());

        let with_summary = AnalysisResult {
            summary: Some(MessageSummary {
                key_points: vec!["Invoice attached".to_string()],
                sentiment: Some(Sentiment::Neutral),
                ..MessageSummary::new("Monthly invoice from the utility.")
            }),
            ..result
        };
        let encoded = serde_json::to_value(&with_summary).unwrap();
        assert_eq!(encoded["summary"]["sentiment"], "neutral");
        assert!(encoded["summary"].get("urgency_indicators").is_none());
    }

    #[test]
    fn sentiment_parsing_is_lenient() {
        assert_eq!(Sentiment::parse_lenient(" Urgent"), Some(Sentiment::Urgent));
        assert_eq!(Sentiment::parse_lenient("unknown"), None);
    }

    #[test]
    fn analysis_staleness() {
        let now = Utc::now();
        let result = AnalysisResult {
            score: 1.0,
            tier: ImportanceTier::Medium,
            rationale: "ok".to_string(),
            category: Category::Other,
            safety_override: false,
            safety_reason: None,
            scored_by: None,
            summary: None,
            analyzed_at: now - chrono::Duration::days(10),
        };

        assert!(result.is_older_than(chrono::Duration::days(7), now));
        assert!(!result.is_older_than(chrono::Duration::days(30), now));
    }
}
