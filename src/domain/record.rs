//! Record set domain types.
//!
//! A [`RecordSet`] is the full local view of the mailbox: every known message
//! keyed by its id, each with an optional analysis.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{AnalysisResult, Message, MessageId};

/// A message together with its latest analysis, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub message: Message,
    pub analysis: Option<AnalysisResult>,
}

impl Record {
    /// Creates an unanalyzed record.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            analysis: None,
        }
    }

    /// Creates a record with an analysis attached.
    pub fn analyzed(message: Message, analysis: AnalysisResult) -> Self {
        Self {
            message,
            analysis: Some(analysis),
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.message.id
    }

    pub fn is_analyzed(&self) -> bool {
        self.analysis.is_some()
    }
}

/// Mapping from message id to [`Record`].
///
/// Keys are always taken from the stored message, so a record can never be
/// filed under another message's id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: BTreeMap<MessageId, Record>,
    // Stored entries this build could not read, written back unchanged.
    unreadable: BTreeMap<String, serde_json::Value>,
    last_sync: Option<DateTime<Utc>>,
    last_analysis: Option<DateTime<Utc>>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an unanalyzed record set from fetched messages.
    ///
    /// Later duplicates of the same id replace earlier ones.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        messages.into_iter().map(Record::new).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.records.contains_key(id)
    }

    /// Inserts a record, returning the one previously stored under its id.
    ///
    /// Replaces any unreadable entry stored under the same key.
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        self.unreadable.remove(record.message.id.as_str());
        self.records.insert(record.message.id.clone(), record)
    }

    /// Keeps a stored entry that could not be parsed so it survives the
    /// next save. Ignored when a readable record already uses `key`.
    pub fn keep_unreadable(&mut self, key: impl Into<String>, raw: serde_json::Value) {
        let key = key.into();
        if !self.records.contains_key(&MessageId::from(key.as_str())) {
            self.unreadable.insert(key, raw);
        }
    }

    /// Entries kept verbatim because they could not be parsed.
    pub fn unreadable(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.unreadable.iter().map(|(key, raw)| (key.as_str(), raw))
    }

    pub fn unreadable_count(&self) -> usize {
        self.unreadable.len()
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Record> {
        self.records.remove(id)
    }

    /// Attaches an analysis to an existing record.
    ///
    /// Returns `false` when no record with that id exists.
    pub fn set_analysis(&mut self, id: &MessageId, analysis: AnalysisResult) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.analysis = Some(analysis);
                true
            }
            None => false,
        }
    }

    /// Updates the read flag of a stored message.
    ///
    /// Returns `false` when no record with that id exists.
    pub fn set_read(&mut self, id: &MessageId, is_read: bool) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.message.is_read = is_read;
                true
            }
            None => false,
        }
    }

    /// Iterates records in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &MessageId> {
        self.records.keys()
    }

    pub fn analyzed_count(&self) -> usize {
        self.records.values().filter(|r| r.is_analyzed()).count()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn set_last_sync(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }

    pub fn last_analysis(&self) -> Option<DateTime<Utc>> {
        self.last_analysis
    }

    pub fn set_last_analysis(&mut self, at: DateTime<Utc>) {
        self.last_analysis = Some(at);
    }

    /// Copies the sync and analysis timestamps from another set.
    pub(crate) fn inherit_timestamps(&mut self, other: &RecordSet) {
        self.last_sync = other.last_sync;
        self.last_analysis = other.last_analysis;
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::collections::btree_map::IntoValues<MessageId, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, ImportanceTier};

    fn message(id: &str) -> Message {
        Message::new(id, "sender@example.com", "Subject", Utc::now())
    }

    fn analysis(score: f64) -> AnalysisResult {
        AnalysisResult {
            score,
            tier: ImportanceTier::Medium,
            rationale: "test".to_string(),
            category: Category::Other,
            safety_override: false,
            safety_reason: None,
            scored_by: None,
            summary: None,
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn records_are_keyed_by_message_id() {
        let set = RecordSet::from_messages(vec![message("b"), message("a")]);
        let ids: Vec<&str> = set.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(set.iter().all(|r| !r.is_analyzed()));
    }

    #[test]
    fn duplicate_messages_keep_last() {
        let mut later = message("a");
        later.is_read = true;
        let set = RecordSet::from_messages(vec![message("a"), later]);

        assert_eq!(set.len(), 1);
        assert!(set.get(&MessageId::from("a")).unwrap().message.is_read);
    }

    #[test]
    fn set_analysis_requires_existing_record() {
        let mut set = RecordSet::from_messages(vec![message("a")]);

        assert!(set.set_analysis(&MessageId::from("a"), analysis(2.0)));
        assert!(!set.set_analysis(&MessageId::from("missing"), analysis(2.0)));
        assert_eq!(set.analyzed_count(), 1);
        assert!(!set.contains(&MessageId::from("missing")));
    }

    #[test]
    fn set_read_updates_flag() {
        let mut set = RecordSet::from_messages(vec![message("a")]);
        assert!(set.set_read(&MessageId::from("a"), true));
        assert!(set.get(&MessageId::from("a")).unwrap().message.is_read);
        assert!(!set.set_read(&MessageId::from("b"), true));
    }

    #[test]
    fn timestamps_are_tracked() {
        let mut set = RecordSet::new();
        assert!(set.last_sync().is_none());

        let now = Utc::now();
        set.set_last_sync(now);
        set.set_last_analysis(now);

        let mut other = RecordSet::new();
        other.inherit_timestamps(&set);
        assert_eq!(other.last_sync(), Some(now));
        assert_eq!(other.last_analysis(), Some(now));
    }

    #[test]
    fn unreadable_entries_yield_to_readable_records() {
        let mut set = RecordSet::new();
        set.keep_unreadable("a", serde_json::json!({ "message": "garbled" }));
        set.keep_unreadable("b", serde_json::json!(42));
        assert_eq!(set.unreadable_count(), 2);
        assert!(set.is_empty());

        set.insert(Record::new(message("a")));
        let keys: Vec<&str> = set.unreadable().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["b"]);

        set.keep_unreadable("a", serde_json::json!(null));
        assert_eq!(set.unreadable_count(), 1);
    }
}
