//! LogStore trait: the abstract interface for record persistence.
//!
//! This trait keeps the sync engine storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::collections::BTreeSet;

use async_trait::async_trait;
use lanlog_core::{LogId, RecordKey, SyncRecord};

use crate::error::Result;

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The slot was empty and now holds the record.
    Inserted,
    /// The slot held a `Missing` placeholder, now replaced by the real record.
    ReplacedPlaceholder,
    /// The slot was already occupied (idempotent, not an error).
    AlreadyExists,
}

impl InsertResult {
    /// True when the store changed.
    pub fn is_new(&self) -> bool {
        !matches!(self, InsertResult::AlreadyExists)
    }
}

/// The LogStore trait: async interface for log persistence.
///
/// All methods are async to support both blocking (SQLite) and async
/// backends. For SQLite, `spawn_blocking` is used internally.
///
/// Every slot `(user, device, sequence)` holds at most one record. A slot
/// holding a placeholder may be overwritten once by the real record; any
/// other occupied slot is immutable.
#[async_trait]
pub trait LogStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a record unless its slot is occupied.
    ///
    /// # Returns
    /// - `Inserted` if the slot was empty.
    /// - `ReplacedPlaceholder` if a real record filled a placeholder slot.
    /// - `AlreadyExists` otherwise. A placeholder never overwrites anything.
    async fn insert_if_absent(&self, record: &SyncRecord) -> Result<InsertResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Per-log queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Highest occupied sequence of a log, placeholders included. 0 if empty.
    async fn latest_sequence(&self, log: &LogId) -> Result<u64>;

    /// Sequences at or below `head` that hold a placeholder.
    async fn missing_below(&self, log: &LogId, head: u64) -> Result<BTreeSet<u64>>;

    /// Records with `from <= sequence <= to`, ordered by sequence.
    ///
    /// Placeholders are included; callers decide whether to skip them.
    async fn range_lookup(&self, log: &LogId, from: u64, to: u64) -> Result<Vec<SyncRecord>>;

    /// The record at one slot, placeholder or not.
    async fn point_lookup(&self, log: &LogId, sequence: u64) -> Result<Option<SyncRecord>>;

    /// Sequence of the newest profile photo in a log.
    async fn latest_profile_sequence(&self, log: &LogId) -> Result<Option<u64>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Whole-store queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Every log with at least one occupied slot, in `LogId` order.
    async fn logs(&self) -> Result<Vec<LogId>>;

    /// Keys of every stored record that is not a placeholder.
    async fn record_keys(&self) -> Result<Vec<RecordKey>>;
}

/// What this device holds for one log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogHead {
    /// Highest occupied sequence, 0 for an unknown log.
    pub sequence: u64,
    /// Placeholder sequences at or below `sequence`.
    pub missing: BTreeSet<u64>,
    /// Newest profile photo, if any.
    pub profile_sequence: Option<u64>,
}

/// Extension trait for queries composed from [`LogStore`] primitives.
pub trait LogStoreExt: LogStore {
    /// Summarize one log.
    fn head(&self, log: &LogId) -> impl std::future::Future<Output = Result<LogHead>> + Send;
}

impl<S: LogStore + ?Sized> LogStoreExt for S {
    async fn head(&self, log: &LogId) -> Result<LogHead> {
        let sequence = self.latest_sequence(log).await?;
        if sequence == 0 {
            return Ok(LogHead::default());
        }
        let missing = self.missing_below(log, sequence).await?;
        let profile_sequence = self.latest_profile_sequence(log).await?;
        Ok(LogHead {
            sequence,
            missing,
            profile_sequence,
        })
    }
}
