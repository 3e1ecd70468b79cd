//! # lanlog Store
//!
//! Storage abstraction for lanlog logs. Provides a trait-based interface for
//! record persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync engine never touches a database directly; everything goes through
//! the [`LogStore`] trait. The primary implementation is [`SqliteStore`],
//! with [`MemoryStore`] for tests.
//!
//! ## Key Types
//!
//! - [`LogStore`] - The async trait for all storage operations
//! - [`LogStoreExt`] - Derived queries (log heads) built on top of it
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of inserting a record
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lanlog_core::{LogId, RecordKind, SyncRecord};
//! use lanlog_store::{LogStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("lanlog.db").unwrap();
//!
//!     let log = LogId::new("alice", "alice-phone");
//!     let record = SyncRecord::new(&log, 1, RecordKind::Chat, "hello");
//!     store.insert_if_absent(&record).await.unwrap();
//!
//!     assert_eq!(store.latest_sequence(&log).await.unwrap(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting into an occupied slot returns `AlreadyExists`
//! - **Placeholders**: A `Missing` slot is the only one a later insert may replace
//! - **Heads include placeholders**: `latest_sequence` is the highest slot of any kind

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{InsertResult, LogHead, LogStore, LogStoreExt};
