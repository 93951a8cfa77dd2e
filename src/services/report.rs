//! Summaries of the record set and of a cleanup selection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::candidate_selector::Candidate;
use super::safety_policy::SafetyPolicy;
use crate::domain::{Category, ImportanceTier, MessageId, RecordSet};

/// Example senders listed per category in a cleanup summary.
const EXAMPLE_SENDERS: usize = 3;

/// Sender domains kept in a digest.
const TOP_SENDERS: usize = 5;

/// Subject keywords kept in a digest.
const TOP_KEYWORDS: usize = 5;

/// Important messages listed in a bullet digest.
const IMPORTANT_SHOWN: usize = 3;

const SUBJECT_WIDTH: usize = 50;

const STOP_WORDS: [&str; 5] = ["from", "your", "this", "that", "with"];

/// Overview of how much of the mailbox has been analyzed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceSummary {
    pub total: usize,
    pub analyzed: usize,
    pub coverage_percent: f64,
    pub tiers: BTreeMap<ImportanceTier, usize>,
    pub overrides: usize,
    /// Messages below the configured deletion cutoff and not protected.
    pub deletable: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
}

impl ImportanceSummary {
    pub fn from_records(records: &RecordSet, policy: &SafetyPolicy, now: DateTime<Utc>) -> Self {
        let cutoff = policy.config().deletion_cutoff;
        let mut tiers = BTreeMap::new();
        let mut overrides = 0;
        let mut deletable = 0;

        for record in records.iter() {
            let Some(analysis) = &record.analysis else {
                continue;
            };
            *tiers.entry(analysis.tier).or_insert(0) += 1;
            if analysis.safety_override {
                overrides += 1;
            }
            if policy
                .check_deletion(&record.message, Some(analysis), cutoff, now)
                .is_deletable()
            {
                deletable += 1;
            }
        }

        let total = records.len();
        let analyzed = records.analyzed_count();
        let coverage_percent = if total == 0 {
            0.0
        } else {
            analyzed as f64 * 100.0 / total as f64
        };

        Self {
            total,
            analyzed,
            coverage_percent,
            tiers,
            overrides,
            deletable,
            last_sync: records.last_sync(),
            last_analysis: records.last_analysis(),
        }
    }
}

impl fmt::Display for ImportanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} messages, {} analyzed ({:.1}%)",
            self.total, self.analyzed, self.coverage_percent
        )?;
        for (tier, count) in &self.tiers {
            writeln!(f, "  {:<8} {count}", tier.as_str())?;
        }
        writeln!(f, "{} protected by safety rules", self.overrides)?;
        write!(f, "{} below the deletion cutoff", self.deletable)
    }
}

/// Per-category breakdown of a candidate list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryGroup {
    pub count: usize,
    pub example_senders: Vec<String>,
}

/// What a cleanup of the given candidates would remove.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupSummary {
    pub total: usize,
    pub total_size_mb: f64,
    pub categories: BTreeMap<Category, CategoryGroup>,
}

impl CleanupSummary {
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        let mut categories: BTreeMap<Category, CategoryGroup> = BTreeMap::new();
        let mut bytes: u64 = 0;

        for candidate in candidates {
            bytes = bytes.saturating_add(candidate.message.size_estimate);
            let group = categories
                .entry(candidate.analysis.category)
                .or_insert_with(|| CategoryGroup {
                    count: 0,
                    example_senders: Vec::new(),
                });
            group.count += 1;

            let sender = candidate.message.sender_display();
            if group.example_senders.len() < EXAMPLE_SENDERS
                && !group.example_senders.contains(&sender)
            {
                group.example_senders.push(sender);
            }
        }

        Self {
            total: candidates.len(),
            total_size_mb: bytes as f64 / (1024.0 * 1024.0),
            categories,
        }
    }
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} candidates, about {:.1} MB",
            self.total, self.total_size_mb
        )?;
        for (category, group) in &self.categories {
            write!(
                f,
                "\n  {} {}: {}",
                group.count,
                category.description(),
                group.example_senders.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Layout of a [`Digest`] when rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestStyle {
    #[default]
    Bullet,
    Paragraph,
    Keywords,
}

impl DigestStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestStyle::Bullet => "bullet",
            DigestStyle::Paragraph => "paragraph",
            DigestStyle::Keywords => "keywords",
        }
    }
}

impl fmt::Display for DigestStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bullet" | "bullets" | "bullet_points" => Ok(DigestStyle::Bullet),
            "paragraph" => Ok(DigestStyle::Paragraph),
            "keywords" => Ok(DigestStyle::Keywords),
            other => Err(format!(
                "unknown digest style: {other} (expected bullet, paragraph or keywords)"
            )),
        }
    }
}

/// A high-importance message called out in a digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub id: MessageId,
    pub subject: String,
    pub sender: String,
    pub score: f64,
    pub summary: Option<String>,
}

/// Overview of the messages received in a period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digest {
    pub total: usize,
    pub unanalyzed: usize,
    pub categories: BTreeMap<Category, usize>,
    /// Sender domains by message count, busiest first.
    pub top_senders: Vec<(String, usize)>,
    /// High and critical messages, highest score first.
    pub important: Vec<DigestEntry>,
    /// Subject words seen more than once, most frequent first.
    pub keywords: Vec<(String, usize)>,
}

impl Digest {
    /// Builds a digest over messages received at or after `since`, or over
    /// every message when `since` is `None`.
    pub fn from_records(records: &RecordSet, since: Option<DateTime<Utc>>) -> Self {
        let mut total = 0;
        let mut unanalyzed = 0;
        let mut categories = BTreeMap::new();
        let mut senders: HashMap<String, usize> = HashMap::new();
        let mut words: HashMap<String, usize> = HashMap::new();
        let mut important = Vec::new();

        let in_window = records
            .iter()
            .filter(|record| since.map_or(true, |since| record.message.received_at >= since));
        for record in in_window {
            let message = &record.message;
            total += 1;

            let domain = message
                .sender_domain()
                .unwrap_or_else(|| message.sender_address());
            *senders.entry(domain.clone()).or_insert(0) += 1;

            for word in subject_words(&message.subject) {
                *words.entry(word).or_insert(0) += 1;
            }

            let Some(analysis) = &record.analysis else {
                unanalyzed += 1;
                continue;
            };
            *categories.entry(analysis.category).or_insert(0) += 1;
            if analysis.tier <= ImportanceTier::High {
                important.push(DigestEntry {
                    id: message.id.clone(),
                    subject: message.subject.clone(),
                    sender: domain,
                    score: analysis.score,
                    summary: analysis.summary.as_ref().map(|s| s.summary.clone()),
                });
            }
        }

        important.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        Self {
            total,
            unanalyzed,
            categories,
            top_senders: ranked(senders, 1, TOP_SENDERS),
            important,
            keywords: ranked(words, 2, TOP_KEYWORDS),
        }
    }

    pub fn render(&self, style: DigestStyle) -> String {
        if self.total == 0 {
            return "No messages to summarize.".to_string();
        }
        match style {
            DigestStyle::Bullet => self.render_bullets(),
            DigestStyle::Paragraph => self.render_paragraph(),
            DigestStyle::Keywords => self.render_keywords(),
        }
    }

    fn render_bullets(&self) -> String {
        let mut lines = vec![format!("Digest of {} messages", self.total), "Categories:".to_string()];
        for (category, count) in &self.categories {
            lines.push(format!("  - {category}: {count}"));
        }
        if self.unanalyzed > 0 {
            lines.push(format!("  - not analyzed: {}", self.unanalyzed));
        }

        lines.push("Top senders:".to_string());
        for (domain, count) in &self.top_senders {
            let plural = if *count == 1 { "" } else { "s" };
            lines.push(format!("  - {domain}: {count} message{plural}"));
        }

        if !self.important.is_empty() {
            lines.push("Important:".to_string());
            for entry in self.important.iter().take(IMPORTANT_SHOWN) {
                let mut line = format!(
                    "  - [{:.1}] {} (from {})",
                    entry.score,
                    truncate(&entry.subject, SUBJECT_WIDTH),
                    entry.sender
                );
                if let Some(summary) = &entry.summary {
                    line.push_str(": ");
                    line.push_str(summary);
                }
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    fn render_paragraph(&self) -> String {
        let mut text = format!("You received {} messages.", self.total);

        let parts: Vec<String> = self
            .categories
            .iter()
            .map(|(category, count)| format!("{count} {category}"))
            .collect();
        if !parts.is_empty() {
            text.push_str(&format!(" These included {} messages.", parts.join(", ")));
        }

        let senders: Vec<String> = self
            .top_senders
            .iter()
            .take(3)
            .map(|(domain, count)| format!("{domain} ({count})"))
            .collect();
        if !senders.is_empty() {
            text.push_str(&format!(" Most came from {}.", senders.join(", ")));
        }

        if !self.important.is_empty() {
            text.push_str(&format!(
                " {} high-priority messages may need your attention.",
                self.important.len()
            ));
        }
        text
    }

    fn render_keywords(&self) -> String {
        let keywords: Vec<String> = self
            .categories
            .iter()
            .map(|(category, count)| format!("{category}({count})"))
            .chain(
                self.top_senders
                    .iter()
                    .take(3)
                    .map(|(domain, count)| format!("{domain}({count})")),
            )
            .chain(self.keywords.iter().map(|(word, count)| format!("{word}({count})")))
            .collect();
        format!("Keywords: {}", keywords.join(", "))
    }
}

fn subject_words(subject: &str) -> impl Iterator<Item = String> + '_ {
    subject
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| word.chars().count() > 3 && !STOP_WORDS.contains(&word.as_str()))
}

/// Entries seen at least `min_count` times, by count descending then name.
fn ranked(counts: HashMap<String, usize>, min_count: usize, limit: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= min_count)
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(limit);
    entries
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::domain::{AnalysisResult, Message, MessageSummary, Record};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn analysis(score: f64, tier: ImportanceTier, category: Category, safety_override: bool) -> AnalysisResult {
        AnalysisResult {
            score,
            tier,
            rationale: String::new(),
            category,
            safety_override,
            safety_reason: None,
            scored_by: None,
            summary: None,
            analyzed_at: Utc::now(),
        }
    }

    fn message(id: &str, sender: &str, size: u64) -> Message {
        let mut message = Message::new(id, sender, "Offer", Utc::now());
        message.size_estimate = size;
        message
    }

    #[test]
    fn importance_summary_counts_tiers_and_deletable() {
        let mut set = RecordSet::new();
        set.insert(Record::analyzed(
            message("1", "a@shop.example", 0),
            analysis(-4.0, ImportanceTier::Low, Category::Promotional, false),
        ));
        set.insert(Record::analyzed(
            message("2", "b@shop.example", 0),
            analysis(-4.0, ImportanceTier::Low, Category::Financial, true),
        ));
        set.insert(Record::analyzed(
            message("3", "c@shop.example", 0),
            analysis(9.0, ImportanceTier::Critical, Category::Personal, false),
        ));
        set.insert(Record::new(message("4", "d@shop.example", 0)));

        let policy = SafetyPolicy::new(Arc::new(AnalysisConfig::default())).unwrap();
        let summary = ImportanceSummary::from_records(&set, &policy, Utc::now());

        assert_eq!(summary.total, 4);
        assert_eq!(summary.analyzed, 3);
        assert_eq!(summary.coverage_percent, 75.0);
        assert_eq!(summary.tiers.get(&ImportanceTier::Low), Some(&2));
        assert_eq!(summary.tiers.get(&ImportanceTier::Critical), Some(&1));
        assert_eq!(summary.overrides, 1);
        assert_eq!(summary.deletable, 1);
        assert!(summary.to_string().starts_with("4 messages, 3 analyzed (75.0%)"));
    }

    #[test]
    fn empty_record_set_has_zero_coverage() {
        let policy = SafetyPolicy::new(Arc::new(AnalysisConfig::default())).unwrap();
        let summary = ImportanceSummary::from_records(&RecordSet::new(), &policy, Utc::now());
        assert_eq!(summary.coverage_percent, 0.0);
    }

    #[test]
    fn cleanup_summary_groups_by_category() {
        let promo = analysis(-3.0, ImportanceTier::Low, Category::Promotional, false);
        let news = analysis(-3.0, ImportanceTier::Low, Category::Newsletter, false);
        let candidates: Vec<Candidate> = [
            ("1", "Shop A <a@shop.example>", &promo),
            ("2", "Shop B <b@shop.example>", &promo),
            ("3", "Shop A <a@shop.example>", &promo),
            ("4", "Shop C <c@shop.example>", &promo),
            ("5", "Shop D <d@shop.example>", &promo),
            ("6", "Daily <daily@news.example>", &news),
        ]
        .into_iter()
        .map(|(id, sender, analysis)| Candidate {
            message: message(id, sender, 512 * 1024),
            analysis: analysis.clone(),
        })
        .collect();

        let summary = CleanupSummary::from_candidates(&candidates);
        assert_eq!(summary.total, 6);
        assert_eq!(summary.total_size_mb, 3.0);

        let promo_group = &summary.categories[&Category::Promotional];
        assert_eq!(promo_group.count, 5);
        assert_eq!(promo_group.example_senders, vec!["Shop A", "Shop B", "Shop C"]);
        assert_eq!(summary.categories[&Category::Newsletter].count, 1);
        assert!(summary.to_string().contains("newsletters and subscriptions: Daily"));
    }

    fn digest_records() -> RecordSet {
        let at = |day| Utc.with_ymd_and_hms(2024, 7, day, 12, 0, 0).unwrap();
        let dated = |id: &str, sender: &str, subject: &str, day| Message::new(id, sender, subject, at(day));

        let mut urgent = analysis(9.0, ImportanceTier::Critical, Category::Personal, false);
        urgent.summary = Some(MessageSummary::new("Dinner moved to Friday."));

        let mut set = RecordSet::new();
        set.insert(Record::analyzed(
            dated("1", "deals@shop.example", "Summer sale starts today", 10),
            analysis(-4.0, ImportanceTier::Low, Category::Promotional, false),
        ));
        set.insert(Record::analyzed(
            dated("2", "Shop <news@shop.example>", "Summer sale: last chance!", 11),
            analysis(-3.0, ImportanceTier::Low, Category::Promotional, false),
        ));
        set.insert(Record::analyzed(
            dated("3", "Sam <sam@friends.example>", "Dinner plans", 12),
            urgent,
        ));
        set.insert(Record::analyzed(
            dated("4", "billing@power.example", "Your invoice is ready", 12),
            analysis(6.0, ImportanceTier::High, Category::Financial, true),
        ));
        set.insert(Record::new(dated("5", "old@archive.example", "Old sale", 1)));
        set
    }

    #[test]
    fn digest_collects_categories_senders_and_important_mail() {
        let digest = Digest::from_records(&digest_records(), None);

        assert_eq!(digest.total, 5);
        assert_eq!(digest.unanalyzed, 1);
        assert_eq!(digest.categories[&Category::Promotional], 2);
        assert_eq!(digest.top_senders[0], ("shop.example".to_string(), 2));

        let important: Vec<&str> = digest.important.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(important, vec!["3", "4"]);
        assert_eq!(digest.important[0].summary.as_deref(), Some("Dinner moved to Friday."));

        assert_eq!(
            digest.keywords,
            vec![("sale".to_string(), 3), ("summer".to_string(), 2)]
        );
    }

    #[test]
    fn digest_window_excludes_older_messages() {
        let since = Utc.with_ymd_and_hms(2024, 7, 5, 0, 0, 0).unwrap();
        let digest = Digest::from_records(&digest_records(), Some(since));

        assert_eq!(digest.total, 4);
        assert_eq!(digest.unanalyzed, 0);
        assert_eq!(digest.keywords, vec![("sale".to_string(), 2), ("summer".to_string(), 2)]);
    }

    #[test]
    fn digest_renders_each_style() {
        let digest = Digest::from_records(&digest_records(), None);

        let bullets = digest.render(DigestStyle::Bullet);
        assert!(bullets.starts_with("Digest of 5 messages"));
        assert!(bullets.contains("  - promotional: 2"));
        assert!(bullets.contains("  - not analyzed: 1"));
        assert!(bullets.contains("  - [9.0] Dinner plans (from friends.example): Dinner moved to Friday."));

        let paragraph = digest.render(DigestStyle::Paragraph);
        assert!(paragraph.starts_with("You received 5 messages."));
        assert!(paragraph.contains("2 high-priority messages"));

        let keywords = digest.render(DigestStyle::Keywords);
        assert!(keywords.starts_with("Keywords: promotional(2)"));
        assert!(keywords.contains("sale(3)"));
    }

    #[test]
    fn empty_digest_says_so() {
        let digest = Digest::from_records(&RecordSet::new(), None);
        assert_eq!(digest.render(DigestStyle::Paragraph), "No messages to summarize.");
    }

    #[test]
    fn digest_style_parsing() {
        assert_eq!("bullet_points".parse::<DigestStyle>(), Ok(DigestStyle::Bullet));
        assert_eq!("Keywords".parse::<DigestStyle>(), Ok(DigestStyle::Keywords));
        assert!("haiku".parse::<DigestStyle>().is_err());
    }
}
