//! # lanlog Core
//!
//! Pure primitives for lanlog: identifiers, log records, and the summaries
//! peers exchange to discover what they are missing.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`LogId`] - One append-only log, owned by a (user, device) pair
//! - [`RecordKey`] - Global identity of one record: `device_user_sequence`
//! - [`SyncRecord`] - A single log entry as it is stored and gossiped
//! - [`HandshakeInfo`] - A per-log summary: head sequence plus holes
//! - [`HandshakeMessage`] - Everything one device claims to hold
//!
//! ## Wire Fields
//!
//! The JSON field names used here are shared with peers on the network and
//! must not change. See [`codec`] for the string encodings of sequence lists
//! and boolean flags.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod record;
pub mod types;
pub mod validation;

pub use codec::{format_sequence_list, parse_sequence_list};
pub use error::{CoreError, ValidationError};
pub use handshake::{HandshakeInfo, HandshakeMessage, SyncRequest, SyncRequestItem};
pub use record::{now_millis, RecordKind, SyncRecord};
pub use types::{DeviceId, LogId, RecordKey, UserId};
pub use validation::{
    sanitize_handshake, validate_inbound_record, validate_request_item, MAX_SEQUENCE,
};
