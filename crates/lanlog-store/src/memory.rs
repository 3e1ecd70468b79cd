//! In-memory implementation of the LogStore trait.
//!
//! Same semantics as SQLite, no persistence. Used by tests and by nodes
//! started without a database path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use lanlog_core::{LogId, RecordKey, RecordKind, SyncRecord};

use crate::error::Result;
use crate::traits::{InsertResult, LogStore};

type Slots = BTreeMap<u64, SyncRecord>;

/// In-memory store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    logs: RwLock<BTreeMap<LogId, Slots>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of occupied slots, placeholders included.
    pub fn len(&self) -> usize {
        self.read().values().map(|slots| slots.len()).sum()
    }

    /// True when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<LogId, Slots>> {
        self.logs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<LogId, Slots>> {
        self.logs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_if_absent(&self, record: &SyncRecord) -> Result<InsertResult> {
        let mut logs = self.write();
        let slots = logs.entry(record.log_id()).or_default();

        match slots.get(&record.sequence) {
            None => {
                slots.insert(record.sequence, record.clone());
                Ok(InsertResult::Inserted)
            }
            Some(existing) if existing.is_placeholder() && !record.is_placeholder() => {
                slots.insert(record.sequence, record.clone());
                Ok(InsertResult::ReplacedPlaceholder)
            }
            Some(_) => Ok(InsertResult::AlreadyExists),
        }
    }

    async fn latest_sequence(&self, log: &LogId) -> Result<u64> {
        Ok(self
            .read()
            .get(log)
            .and_then(|slots| slots.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn missing_below(&self, log: &LogId, head: u64) -> Result<BTreeSet<u64>> {
        Ok(self
            .read()
            .get(log)
            .map(|slots| {
                slots
                    .range(..=head)
                    .filter(|(_, r)| r.is_placeholder())
                    .map(|(seq, _)| *seq)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn range_lookup(&self, log: &LogId, from: u64, to: u64) -> Result<Vec<SyncRecord>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .read()
            .get(log)
            .map(|slots| slots.range(from..=to).map(|(_, r)| r.clone()).collect())
            .unwrap_or_default())
    }

    async fn point_lookup(&self, log: &LogId, sequence: u64) -> Result<Option<SyncRecord>> {
        Ok(self
            .read()
            .get(log)
            .and_then(|slots| slots.get(&sequence).cloned()))
    }

    async fn latest_profile_sequence(&self, log: &LogId) -> Result<Option<u64>> {
        Ok(self.read().get(log).and_then(|slots| {
            slots
                .iter()
                .rev()
                .find(|(_, r)| r.kind == RecordKind::Photo)
                .map(|(seq, _)| *seq)
        }))
    }

    async fn logs(&self) -> Result<Vec<LogId>> {
        Ok(self
            .read()
            .iter()
            .filter(|(_, slots)| !slots.is_empty())
            .map(|(log, _)| log.clone())
            .collect())
    }

    async fn record_keys(&self) -> Result<Vec<RecordKey>> {
        Ok(self
            .read()
            .iter()
            .flat_map(|(log, slots)| {
                slots
                    .iter()
                    .filter(|(_, r)| !r.is_placeholder())
                    .map(move |(seq, _)| log.key(*seq))
            })
            .collect())
    }
}
