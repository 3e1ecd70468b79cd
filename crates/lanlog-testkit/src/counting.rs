//! Instrumented store wrapper.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use lanlog_core::{LogId, RecordKey, SyncRecord};
use lanlog_store::{InsertResult, LogStore, Result, StoreError};

/// Snapshot of how often each kind of call reached the inner store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub inserts: usize,
    pub reads: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.inserts + self.reads
    }
}

/// Wraps a store, counting every call and optionally failing inserts.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    inserts: AtomicUsize,
    reads: AtomicUsize,
    fail_inserts: AtomicBool,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            inserts: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn counts(&self) -> CallCounts {
        CallCounts {
            inserts: self.inserts.load(Ordering::SeqCst),
            reads: self.reads.load(Ordering::SeqCst),
        }
    }

    pub fn reset(&self) {
        self.inserts.store(0, Ordering::SeqCst);
        self.reads.store(0, Ordering::SeqCst);
    }

    /// Make every following insert fail until switched off again.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: LogStore> LogStore for CountingStore<S> {
    async fn insert_if_absent(&self, record: &SyncRecord) -> Result<InsertResult> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("injected insert failure".into()));
        }
        self.inner.insert_if_absent(record).await
    }

    async fn latest_sequence(&self, log: &LogId) -> Result<u64> {
        self.read();
        self.inner.latest_sequence(log).await
    }

    async fn missing_below(&self, log: &LogId, head: u64) -> Result<BTreeSet<u64>> {
        self.read();
        self.inner.missing_below(log, head).await
    }

    async fn range_lookup(&self, log: &LogId, from: u64, to: u64) -> Result<Vec<SyncRecord>> {
        self.read();
        self.inner.range_lookup(log, from, to).await
    }

    async fn point_lookup(&self, log: &LogId, sequence: u64) -> Result<Option<SyncRecord>> {
        self.read();
        self.inner.point_lookup(log, sequence).await
    }

    async fn latest_profile_sequence(&self, log: &LogId) -> Result<Option<u64>> {
        self.read();
        self.inner.latest_profile_sequence(log).await
    }

    async fn logs(&self) -> Result<Vec<LogId>> {
        self.read();
        self.inner.logs().await
    }

    async fn record_keys(&self) -> Result<Vec<RecordKey>> {
        self.read();
        self.inner.record_keys().await
    }
}
