//! Test fixtures and helpers.
//!
//! User `X` always writes from device `X-device`, so a log can be named by
//! its user alone.

use lanlog_core::{DeviceId, LogId, RecordKind, SyncRecord};
use lanlog_store::{LogStore, MemoryStore};

/// The log of user `user` on device `{user}-device`.
pub fn log(user: &str) -> LogId {
    LogId::new(user, device(user))
}

/// The device user `user` writes from.
pub fn device(user: &str) -> DeviceId {
    DeviceId::from(format!("{user}-device"))
}

/// A chat record whose payload is `{user}{seq}`, e.g. `A7`.
pub fn record(user: &str, seq: u64) -> SyncRecord {
    SyncRecord::new(&log(user), seq, RecordKind::Chat, format!("{user}{seq}"))
}

/// A placeholder in `user`'s log, as written by `observer`.
pub fn placeholder(user: &str, seq: u64, observer: &str) -> SyncRecord {
    SyncRecord::placeholder(&log(user), seq, &DeviceId::from(observer))
}

/// Insert `record(user, seq)` for every `seq`.
///
/// # Panics
/// If the store fails.
pub async fn seed_log<S: LogStore + ?Sized>(
    store: &S,
    user: &str,
    seqs: impl IntoIterator<Item = u64>,
) {
    for seq in seqs {
        store
            .insert_if_absent(&record(user, seq))
            .await
            .expect("seeding store failed");
    }
}

/// A memory store holding `record(user, 1..=head)` for each `(user, head)`.
pub async fn seeded_store(logs: &[(&str, u64)]) -> MemoryStore {
    let store = MemoryStore::new();
    for &(user, head) in logs {
        seed_log(&store, user, 1..=head).await;
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_scheme() {
        let r = record("A", 7);
        assert_eq!(r.payload, "A7");
        assert_eq!(r.log_id(), log("A"));
        assert_eq!(r.device_id, device("A"));
        assert!(placeholder("A", 3, "B-device").is_placeholder());
    }

    #[tokio::test]
    async fn test_seeded_store() {
        let store = seeded_store(&[("A", 3), ("B", 2)]).await;
        assert_eq!(store.len(), 5);
        assert_eq!(store.latest_sequence(&log("A")).await.unwrap(), 3);
    }
}
