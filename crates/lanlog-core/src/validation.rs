//! Structural checks on data received from peers.
//!
//! Nothing received over the network is trusted. Records and request items
//! that fail these checks are dropped by the caller; handshakes are cleaned
//! up rather than rejected, since a partially bogus summary still carries
//! useful claims.

use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::handshake::{HandshakeInfo, HandshakeMessage, SyncRequestItem};
use crate::record::SyncRecord;
use crate::types::LogId;

/// Highest sequence any store can hold. SQLite integers are signed.
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

/// Check a record received in a `syncInfoMessage`.
pub fn validate_inbound_record(record: &SyncRecord) -> Result<(), ValidationError> {
    if record.user_id.is_empty() || record.device_id.is_empty() {
        return Err(ValidationError::MissingIdentity(record.key()));
    }
    if record.sequence == 0 {
        return Err(ValidationError::ZeroSequence(0));
    }
    if record.sequence > MAX_SEQUENCE {
        return Err(ValidationError::SequenceOutOfRange(record.sequence));
    }
    if record.is_placeholder() {
        return Err(ValidationError::PlaceholderOnWire(record.key()));
    }
    Ok(())
}

/// Check one item of a `syncInfoRequestMessage`.
pub fn validate_request_item(item: &SyncRequestItem) -> Result<(), ValidationError> {
    if item.user_id.is_empty() || item.device_id.is_empty() {
        return Err(ValidationError::StructuralError(
            "request item has an empty user or device id".into(),
        ));
    }
    if item.starting_sequence == 0 {
        return Err(ValidationError::ZeroSequence(0));
    }
    if item.starting_sequence > item.ending_sequence {
        return Err(ValidationError::InvertedRange {
            start: item.starting_sequence,
            end: item.ending_sequence,
        });
    }
    Ok(())
}

/// Normalize a handshake received from a peer.
///
/// - infos with an empty identity or a zero sequence are dropped
/// - holes outside `1..=sequence` are dropped
/// - a profile sequence above the head is dropped
/// - duplicate infos for one log collapse to the one with the highest head
/// - internal ask fields are cleared and `from` is set to the envelope sender
pub fn sanitize_handshake(msg: HandshakeMessage) -> HandshakeMessage {
    let mut by_log: BTreeMap<LogId, HandshakeInfo> = BTreeMap::new();

    for mut info in msg.infos {
        if info.user_id.is_empty() || info.device_id.is_empty() || info.sequence == 0 {
            continue;
        }
        let head = info.sequence;
        info.missing.retain(|s| *s >= 1 && *s <= head);
        if info.profile_sequence.is_some_and(|p| p == 0 || p > head) {
            info.profile_sequence = None;
        }
        info.starting_sequence = None;
        info.from = Some(msg.from.clone());

        let log = info.log_id();
        match by_log.get(&log) {
            Some(existing) if existing.sequence >= info.sequence => {}
            _ => {
                by_log.insert(log, info);
            }
        }
    }

    HandshakeMessage {
        from: msg.from,
        infos: by_log.into_values().collect(),
        reply_requested: msg.reply_requested,
    }
}
