//! # Lanlog Sync
//!
//! Gossip anti-entropy for append-only per-device logs on a local network.
//!
//! ## Overview
//!
//! Every device keeps one log per `(user, device)` it has heard of and
//! broadcasts a summary of them (a handshake). Peers collect handshakes for
//! a short window, work out what they lack, and ask the device that claims
//! the most for exactly those records. There is no leader and no unicast;
//! requests carry their addressee in the payload.
//!
//! ## Key Properties
//!
//! - **Idempotent**: receiving a record twice changes nothing
//! - **Gap-aware**: records that arrive ahead of a hole are kept, the hole is
//!   marked with placeholders, and the next round asks for it
//! - **Bounded**: only the newest `sync_window` records of a log are asked for
//!
//! ## Message Flow
//!
//! ```text
//! Node A                                   Node B
//!   |-------- handshaking (reply) -------->|
//!   |<------- handshaking -----------------|
//!   |          (both collect for 5s)        |
//!   |<------- syncInfoRequestMessage ------|  target = A
//!   |-------- syncInfoMessage ------------>|
//! ```

pub mod convergence;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod inbound;
pub mod messages;
pub mod reconcile;
pub mod timer;
pub mod transport;

pub use convergence::{summarize, verify_all_logs, verify_convergence, ConvergenceResult, LogSummary};
pub use dispatch::Dispatcher;
pub use engine::{
    Dispatched, EngineEvent, HandshakeOutcome, IngestReport, LocalIdentity, RequestOutcome,
    RoundReport, SyncConfig, SyncEngine,
};
pub use error::{Result, SyncError};
pub use inbound::{classify, RecordStatus};
pub use messages::{limits, MessageKind, SyncInfoMessage, WireMessage};
pub use reconcile::{reconcile, AbandonedGap, Reconciliation, Round};
pub use timer::RoundTimer;
pub use transport::{
    memory::MemoryNetwork, memory::MemoryTransport, udp::UdpMulticastTransport, Inbound, Transport,
};
