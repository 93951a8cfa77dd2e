//! Merging a fresh mailbox snapshot into the stored record set.
//!
//! The snapshot is authoritative for membership: ids it does not contain
//! are dropped. For ids it does contain, the fetched message replaces the
//! stored one and any prior analysis is carried forward unchanged.

use serde::Serialize;

use crate::domain::{Message, MessageId, Record, RecordSet};

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Distinct messages in the snapshot.
    pub fetched: usize,
    /// Stored analyses kept for still-present messages.
    pub carried_over: usize,
    /// Ids seen for the first time.
    pub new_ids: Vec<MessageId>,
    /// Stored ids absent from the snapshot.
    pub dropped_ids: Vec<MessageId>,
}

/// Merges `fetched` into `existing` and returns the new record set.
///
/// Pure: neither input is persisted or otherwise touched.
pub fn reconcile(existing: &RecordSet, fetched: impl IntoIterator<Item = Message>) -> RecordSet {
    reconcile_with_report(existing, fetched).0
}

/// Like [`reconcile`], also describing what changed.
pub fn reconcile_with_report(
    existing: &RecordSet,
    fetched: impl IntoIterator<Item = Message>,
) -> (RecordSet, SyncReport) {
    let mut merged = RecordSet::new();
    merged.inherit_timestamps(existing);

    // Later duplicates of an id replace earlier ones.
    for message in fetched {
        let analysis = existing
            .get(&message.id)
            .and_then(|record| record.analysis.clone());
        merged.insert(Record { message, analysis });
    }

    let mut report = SyncReport {
        fetched: merged.len(),
        ..SyncReport::default()
    };
    for record in merged.iter() {
        match existing.get(record.id()) {
            Some(_) if record.is_analyzed() => report.carried_over += 1,
            Some(_) => {}
            None => report.new_ids.push(record.id().clone()),
        }
    }
    report.dropped_ids = existing
        .ids()
        .filter(|id| !merged.contains(id))
        .cloned()
        .collect();

    (merged, report)
}
