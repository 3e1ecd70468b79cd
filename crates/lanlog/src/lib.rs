//! # Lanlog
//!
//! Serverless group chat for devices on the same local network.
//!
//! ## Overview
//!
//! Every device appends messages to its own log and gossips summaries of
//! every log it holds over UDP multicast. Devices that notice they are
//! behind ask the best-informed peer for exactly the records they lack, so
//! every device eventually holds every log without any server.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lanlog::{Node, NodeConfig};
//!
//! async fn example() -> lanlog::Result<()> {
//!     let config = NodeConfig::load()?;
//!     let node = Node::open(config)?;
//!
//!     node.start().await?;
//!     node.send_chat("hello from the LAN", None).await?;
//!
//!     let mut events = node.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `lanlog::core` - identifiers, records, handshake summaries
//! - `lanlog::store` - storage abstraction and SQLite
//! - `lanlog::sync` - the gossip protocol

pub mod config;
pub mod error;
pub mod node;

// Re-export component crates
pub use lanlog_core as core;
pub use lanlog_store as store;
pub use lanlog_sync as sync;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::Node;

// Re-export commonly used types
pub use lanlog_core::{DeviceId, LogId, RecordKind, SyncRecord, UserId};
pub use lanlog_sync::{EngineEvent, SyncConfig};
