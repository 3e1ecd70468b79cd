//! Convergence verification between stores.
//!
//! After enough rounds every device should hold the same records for every
//! log. These helpers compare two stores directly. They never touch the wire.

use std::collections::BTreeSet;

use lanlog_core::{LogId, RecordKey, SyncRecord};
use lanlog_store::{LogStore, LogStoreExt};

use crate::error::Result;

/// What one store holds for one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    /// Highest sequence present, placeholders included.
    pub head: u64,
    /// Real records held.
    pub records: usize,
    /// Sequences at or below `head` with only a placeholder or nothing.
    pub missing: BTreeSet<u64>,
    pub profile_sequence: Option<u64>,
}

impl LogSummary {
    /// True when every sequence from 1 to `head` is a real record.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.records as u64 == self.head
    }
}

/// Summarize one log.
pub async fn summarize<S: LogStore>(store: &S, log: &LogId) -> Result<LogSummary> {
    let head = store.head(log).await?;
    let records = if head.sequence == 0 {
        0
    } else {
        store
            .range_lookup(log, 1, head.sequence)
            .await?
            .iter()
            .filter(|r| !r.is_placeholder())
            .count()
    };

    Ok(LogSummary {
        head: head.sequence,
        records,
        missing: head.missing,
        profile_sequence: head.profile_sequence,
    })
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both stores hold identical records for the log.
    Converged,
    /// Not there yet; more rounds may fix it.
    NotConverged { reason: String },
    /// Both hold a record at the same position with different content.
    /// Rounds cannot fix this.
    Diverged { key: RecordKey },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, ConvergenceResult::Diverged { .. })
    }
}

fn same_content(a: &SyncRecord, b: &SyncRecord) -> bool {
    a.kind == b.kind && a.payload == b.payload && a.recipient_user_id == b.recipient_user_id
}

/// Compare one log across two stores.
///
/// Placeholders count as missing. Who relayed a record is ignored.
pub async fn verify_convergence<L: LogStore, R: LogStore>(
    local: &L,
    remote: &R,
    log: &LogId,
) -> Result<ConvergenceResult> {
    let mine = summarize(local, log).await?;
    let theirs = summarize(remote, log).await?;

    if mine.head != theirs.head {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("head mismatch: local={}, remote={}", mine.head, theirs.head),
        });
    }
    if mine.head == 0 {
        return Ok(ConvergenceResult::Converged);
    }

    let local_records = local.range_lookup(log, 1, mine.head).await?;
    let remote_records = remote.range_lookup(log, 1, theirs.head).await?;

    for (a, b) in local_records.iter().zip(remote_records.iter()) {
        if a.sequence != b.sequence || a.is_placeholder() != b.is_placeholder() {
            let seq = a.sequence.min(b.sequence);
            return Ok(ConvergenceResult::NotConverged {
                reason: format!("records differ at sequence {seq}"),
            });
        }
        if !a.is_placeholder() && !same_content(a, b) {
            return Ok(ConvergenceResult::Diverged { key: a.key() });
        }
    }
    if local_records.len() != remote_records.len() {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!(
                "record count mismatch: local={}, remote={}",
                local_records.len(),
                remote_records.len()
            ),
        });
    }
    if !mine.missing.is_empty() {
        return Ok(ConvergenceResult::NotConverged {
            reason: format!("both missing {} records", mine.missing.len()),
        });
    }

    Ok(ConvergenceResult::Converged)
}

/// Compare every log either store knows about.
pub async fn verify_all_logs<L: LogStore, R: LogStore>(
    local: &L,
    remote: &R,
) -> Result<Vec<(LogId, ConvergenceResult)>> {
    let logs: BTreeSet<LogId> = local
        .logs()
        .await?
        .into_iter()
        .chain(remote.logs().await?)
        .collect();

    let mut results = Vec::with_capacity(logs.len());
    for log in logs {
        let result = verify_convergence(local, remote, &log).await?;
        results.push((log, result));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlog_core::{DeviceId, RecordKind};
    use lanlog_store::MemoryStore;

    fn log() -> LogId {
        LogId::new("A", "A-device")
    }

    async fn seed(store: &MemoryStore, seqs: impl IntoIterator<Item = u64>) {
        for seq in seqs {
            let record = SyncRecord::new(&log(), seq, RecordKind::Chat, format!("A{seq}"));
            store.insert_if_absent(&record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_identical_logs_converge() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        seed(&a, 1..=5).await;
        seed(&b, 1..=5).await;

        assert!(verify_convergence(&a, &b, &log()).await.unwrap().is_converged());
        let summary = summarize(&a, &log()).await.unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.records, 5);
    }

    #[tokio::test]
    async fn test_head_mismatch() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        seed(&a, 1..=5).await;
        seed(&b, 1..=3).await;

        let result = verify_convergence(&a, &b, &log()).await.unwrap();
        assert!(!result.is_converged());
        assert!(!result.is_diverged());
    }

    #[tokio::test]
    async fn test_placeholder_is_not_converged() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        seed(&a, 1..=3).await;
        seed(&b, [1, 3]).await;
        b.insert_if_absent(&SyncRecord::placeholder(&log(), 2, &DeviceId::from("B")))
            .await
            .unwrap();

        let result = verify_convergence(&a, &b, &log()).await.unwrap();
        assert!(!result.is_converged());
        assert!(!summarize(&b, &log()).await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_different_content_diverges() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        seed(&a, 1..=2).await;
        seed(&b, [1]).await;
        let forged = SyncRecord::new(&log(), 2, RecordKind::Chat, "something else");
        b.insert_if_absent(&forged).await.unwrap();

        let result = verify_convergence(&a, &b, &log()).await.unwrap();
        assert_eq!(result, ConvergenceResult::Diverged { key: log().key(2) });
    }

    #[tokio::test]
    async fn test_verify_all_logs_covers_both_sides() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        seed(&a, 1..=2).await;
        let other = LogId::new("B", "B-device");
        b.insert_if_absent(&SyncRecord::new(&other, 1, RecordKind::Chat, "B1"))
            .await
            .unwrap();

        let results = verify_all_logs(&a, &b).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| !r.is_converged()));
    }
}
