//! SQLite implementation of the LogStore trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via `tokio::task::spawn_blocking`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use lanlog_core::{now_millis, DeviceId, LogId, RecordKey, RecordKind, SyncRecord, UserId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertResult, LogStore};

/// SQLite-based store.
///
/// Thread-safe via an internal Mutex. All operations run on the blocking
/// thread pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

const RECORD_COLUMNS: &str =
    "user_id, device_id, sequence, kind, payload, recipient_user_id, logged_at, sender";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    let kind: String = row.get("kind")?;
    let kind = kind.parse::<RecordKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let recipient: Option<String> = row.get("recipient_user_id")?;

    Ok(SyncRecord {
        user_id: UserId::from(row.get::<_, String>("user_id")?),
        device_id: DeviceId::from(row.get::<_, String>("device_id")?),
        sequence: row.get::<_, i64>("sequence")? as u64,
        kind,
        payload: row.get("payload")?,
        recipient_user_id: recipient.map(UserId::from),
        logged_at: row.get::<_, i64>("logged_at")? as u64,
        sender: DeviceId::from(row.get::<_, String>("sender")?),
    })
}

fn to_sql_seq(seq: u64) -> Result<i64> {
    i64::try_from(seq).map_err(|_| StoreError::InvalidData(format!("sequence {seq} out of range")))
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn insert_if_absent(&self, record: &SyncRecord) -> Result<InsertResult> {
        let record = record.clone();
        let seq = to_sql_seq(record.sequence)?;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT kind FROM records
                     WHERE user_id = ?1 AND device_id = ?2 AND sequence = ?3",
                    params![record.user_id.as_str(), record.device_id.as_str(), seq],
                    |row| row.get(0),
                )
                .optional()?;

            let result = match existing.as_deref() {
                None => InsertResult::Inserted,
                Some("Missing") if !record.is_placeholder() => InsertResult::ReplacedPlaceholder,
                Some(_) => return Ok(InsertResult::AlreadyExists),
            };

            tx.execute(
                "INSERT OR REPLACE INTO records (
                    user_id, device_id, sequence, kind, payload, recipient_user_id,
                    logged_at, sender, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.user_id.as_str(),
                    record.device_id.as_str(),
                    seq,
                    record.kind.as_str(),
                    record.payload,
                    record.recipient_user_id.as_ref().map(|u| u.as_str()),
                    record.logged_at as i64,
                    record.sender.as_str(),
                    now_millis() as i64,
                ],
            )?;
            tx.commit()?;

            Ok(result)
        })
        .await
    }

    async fn latest_sequence(&self, log: &LogId) -> Result<u64> {
        let log = log.clone();
        self.blocking(move |conn| {
            let max: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM records
                 WHERE user_id = ?1 AND device_id = ?2",
                params![log.user_id.as_str(), log.device_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(max as u64)
        })
        .await
    }

    async fn missing_below(&self, log: &LogId, head: u64) -> Result<BTreeSet<u64>> {
        let log = log.clone();
        let head = to_sql_seq(head)?;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sequence FROM records
                 WHERE user_id = ?1 AND device_id = ?2 AND kind = 'Missing' AND sequence <= ?3",
            )?;
            let seqs = stmt
                .query_map(
                    params![log.user_id.as_str(), log.device_id.as_str(), head],
                    |row| row.get::<_, i64>(0),
                )?
                .map(|r| r.map(|s| s as u64))
                .collect::<rusqlite::Result<BTreeSet<u64>>>()?;
            Ok(seqs)
        })
        .await
    }

    async fn range_lookup(&self, log: &LogId, from: u64, to: u64) -> Result<Vec<SyncRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        let log = log.clone();
        let (from, to) = (to_sql_seq(from)?, to_sql_seq(to)?);
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE user_id = ?1 AND device_id = ?2 AND sequence >= ?3 AND sequence <= ?4
                 ORDER BY sequence"
            ))?;
            let records = stmt
                .query_map(
                    params![log.user_id.as_str(), log.device_id.as_str(), from, to],
                    row_to_record,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn point_lookup(&self, log: &LogId, sequence: u64) -> Result<Option<SyncRecord>> {
        let log = log.clone();
        let seq = to_sql_seq(sequence)?;
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records
                     WHERE user_id = ?1 AND device_id = ?2 AND sequence = ?3"
                ),
                params![log.user_id.as_str(), log.device_id.as_str(), seq],
                row_to_record,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn latest_profile_sequence(&self, log: &LogId) -> Result<Option<u64>> {
        let log = log.clone();
        self.blocking(move |conn| {
            let max: Option<i64> = conn.query_row(
                "SELECT MAX(sequence) FROM records
                 WHERE user_id = ?1 AND device_id = ?2 AND kind = 'Photo'",
                params![log.user_id.as_str(), log.device_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(max.map(|s| s as u64))
        })
        .await
    }

    async fn logs(&self) -> Result<Vec<LogId>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT user_id, device_id FROM records ORDER BY user_id, device_id",
            )?;
            let logs = stmt
                .query_map([], |row| {
                    Ok(LogId::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(logs)
        })
        .await
    }

    async fn record_keys(&self) -> Result<Vec<RecordKey>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, device_id, sequence FROM records
                 WHERE kind != 'Missing' ORDER BY user_id, device_id, sequence",
            )?;
            let keys = stmt
                .query_map([], |row| {
                    let log = LogId::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
                    Ok(log.key(row.get::<_, i64>(2)? as u64))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LogStoreExt;
    use tempfile::TempDir;

    fn log() -> LogId {
        LogId::new("A", "A-device")
    }

    fn chat(seq: u64) -> SyncRecord {
        SyncRecord::new(&log(), seq, RecordKind::Chat, format!("m{seq}")).with_recipient("B")
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = SqliteStore::open_memory().unwrap();
        let record = chat(1);

        assert_eq!(
            store.insert_if_absent(&record).await.unwrap(),
            InsertResult::Inserted
        );
        let loaded = store.point_lookup(&log(), 1).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_idempotent_insert() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_if_absent(&chat(1)).await.unwrap();

        let mut changed = chat(1);
        changed.payload = "different".into();
        assert_eq!(
            store.insert_if_absent(&changed).await.unwrap(),
            InsertResult::AlreadyExists
        );
        let loaded = store.point_lookup(&log(), 1).await.unwrap().unwrap();
        assert_eq!(loaded.payload, "m1");
    }

    #[tokio::test]
    async fn test_placeholder_lifecycle() {
        let store = SqliteStore::open_memory().unwrap();
        let observer = DeviceId::from("C-device");
        store.insert_if_absent(&chat(3)).await.unwrap();
        for seq in [1, 2] {
            let hole = SyncRecord::placeholder(&log(), seq, &observer);
            store.insert_if_absent(&hole).await.unwrap();
        }

        let head = store.head(&log()).await.unwrap();
        assert_eq!(head.sequence, 3);
        assert_eq!(head.missing, [1, 2].into_iter().collect::<BTreeSet<u64>>());

        assert_eq!(
            store.insert_if_absent(&chat(2)).await.unwrap(),
            InsertResult::ReplacedPlaceholder
        );
        let hole = SyncRecord::placeholder(&log(), 3, &observer);
        assert_eq!(
            store.insert_if_absent(&hole).await.unwrap(),
            InsertResult::AlreadyExists
        );
        assert_eq!(
            store.missing_below(&log(), 3).await.unwrap(),
            [1].into_iter().collect()
        );
        assert_eq!(store.record_keys().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_range_lookup_ordered() {
        let store = SqliteStore::open_memory().unwrap();
        for seq in [5, 1, 3, 2, 4] {
            store.insert_if_absent(&chat(seq)).await.unwrap();
        }
        let seqs: Vec<u64> = store
            .range_lookup(&log(), 2, 4)
            .await
            .unwrap()
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_logs_and_profile() {
        let store = SqliteStore::open_memory().unwrap();
        let other = LogId::new("B", "B-device");
        store.insert_if_absent(&chat(1)).await.unwrap();
        let photo = SyncRecord::new(&other, 1, RecordKind::Photo, "png");
        store.insert_if_absent(&photo).await.unwrap();

        assert_eq!(store.logs().await.unwrap(), vec![log(), other.clone()]);
        assert_eq!(store.latest_profile_sequence(&other).await.unwrap(), Some(1));
        assert_eq!(store.latest_profile_sequence(&log()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lanlog.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_if_absent(&chat(1)).await.unwrap();
            store.insert_if_absent(&chat(2)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.latest_sequence(&log()).await.unwrap(), 2);
    }
}
