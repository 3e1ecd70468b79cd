//! Classification of records received from peers.
//!
//! A record is only *accepted* once its predecessor is, so the accepted set
//! of every log is always a contiguous prefix (apart from sealed gaps).
//! Anything arriving ahead of that prefix is kept but marked out of sync,
//! and the hole below it is filled with placeholders.

use std::collections::HashSet;

use lanlog_core::RecordKey;

use crate::reconcile::window_floor;

/// What to do with one inbound record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    /// Already accepted. Discard.
    Duplicate,
    /// Predecessor not accepted yet. Store it and mark the hole below it.
    OutOfSync,
    /// Contiguous with what is already accepted.
    Accepted,
}

/// Classify a record against the accepted key set.
pub fn classify(accepted: &HashSet<RecordKey>, key: &RecordKey) -> RecordStatus {
    if accepted.contains(key) {
        return RecordStatus::Duplicate;
    }
    match key.prev() {
        Some(prev) if !accepted.contains(&prev) => RecordStatus::OutOfSync,
        _ => RecordStatus::Accepted,
    }
}

/// Sequences to try as placeholders below an out-of-sync record, nearest first.
///
/// Bounded by the sync window so a record far ahead of everything we hold
/// does not make us write thousands of placeholders. The caller stops at the
/// first slot that is already occupied.
pub fn placeholder_candidates(sequence: u64, window: u64) -> impl Iterator<Item = u64> {
    let floor = window_floor(sequence.saturating_sub(1), window);
    (floor..sequence).rev()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlog_core::LogId;

    fn accepted(seqs: &[u64]) -> HashSet<RecordKey> {
        let log = LogId::new("B", "B-device");
        seqs.iter().map(|s| log.key(*s)).collect()
    }

    fn key(seq: u64) -> RecordKey {
        LogId::new("B", "B-device").key(seq)
    }

    #[test]
    fn test_classify() {
        let set = accepted(&[1, 2, 3]);
        assert_eq!(classify(&set, &key(2)), RecordStatus::Duplicate);
        assert_eq!(classify(&set, &key(4)), RecordStatus::Accepted);
        assert_eq!(classify(&set, &key(5)), RecordStatus::OutOfSync);
    }

    #[test]
    fn test_first_record_is_always_contiguous() {
        assert_eq!(classify(&HashSet::new(), &key(1)), RecordStatus::Accepted);
        assert_eq!(classify(&HashSet::new(), &key(2)), RecordStatus::OutOfSync);
    }

    #[test]
    fn test_other_logs_do_not_count() {
        let set: HashSet<RecordKey> = [LogId::new("B", "other-device").key(4)].into();
        assert_eq!(classify(&set, &key(5)), RecordStatus::OutOfSync);
    }

    #[test]
    fn test_placeholder_candidates() {
        assert_eq!(placeholder_candidates(5, 100).collect::<Vec<_>>(), vec![4, 3, 2, 1]);
        assert_eq!(placeholder_candidates(1, 100).count(), 0);
        assert_eq!(
            placeholder_candidates(30, 10).collect::<Vec<_>>(),
            (20..30).rev().collect::<Vec<_>>()
        );
    }
}
