//! Handshake summaries and sync requests.
//!
//! A device advertises what it holds as one [`HandshakeInfo`] per known log:
//! the highest sequence it has a slot for plus the sequences in that range it
//! still lacks. After a round of handshakes, a device turns the difference
//! between the claims it heard and its own state into [`SyncRequest`]s, each
//! addressed to the single peer best placed to answer it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::codec::{bool_flag, sequence_list};
use crate::types::{DeviceId, LogId, UserId};

/// Summary of one log as held by one device.
///
/// Also used as an internal "ask" during reconciliation: `starting_sequence`
/// marks a range ask and `from` names the peer it will be addressed to.
/// Neither of those two fields is ever put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    #[serde(rename = "userId")]
    pub user_id: UserId,

    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,

    /// Highest sequence the holder has a slot for, placeholders included.
    pub sequence: u64,

    /// Sequences at or below `sequence` the holder does not actually have.
    #[serde(rename = "missingMessages", with = "sequence_list", default)]
    pub missing: BTreeSet<u64>,

    /// Sequence of the newest profile photo in this log, if any.
    #[serde(
        rename = "profileSequence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_sequence: Option<u64>,

    #[serde(skip)]
    pub starting_sequence: Option<u64>,

    #[serde(skip)]
    pub from: Option<DeviceId>,
}

impl HandshakeInfo {
    /// Create a summary with no holes.
    pub fn new(log: &LogId, sequence: u64) -> Self {
        Self {
            user_id: log.user_id.clone(),
            device_id: log.device_id.clone(),
            sequence,
            missing: BTreeSet::new(),
            profile_sequence: None,
            starting_sequence: None,
            from: None,
        }
    }

    /// Create an ask for `start..=end` of `log`, to be sent to `target`.
    pub fn ask(log: &LogId, start: u64, end: u64, target: &DeviceId) -> Self {
        Self {
            starting_sequence: Some(start),
            from: Some(target.clone()),
            ..Self::new(log, end)
        }
    }

    /// Set the holes.
    pub fn with_missing(mut self, missing: impl IntoIterator<Item = u64>) -> Self {
        self.missing = missing.into_iter().collect();
        self
    }

    /// Set the profile photo sequence.
    pub fn with_profile_sequence(mut self, seq: Option<u64>) -> Self {
        self.profile_sequence = seq;
        self
    }

    /// The log this summary describes.
    pub fn log_id(&self) -> LogId {
        LogId {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// First sequence of the asked range. Defaults to 1 for plain summaries.
    pub fn start(&self) -> u64 {
        self.starting_sequence.unwrap_or(1)
    }
}

/// Everything one device claims to hold, broadcast to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub from: DeviceId,

    #[serde(default)]
    pub infos: Vec<HandshakeInfo>,

    /// When set, every receiver answers with its own handshake right away.
    #[serde(rename = "reply", with = "bool_flag", default)]
    pub reply_requested: bool,
}

impl HandshakeMessage {
    /// Create a handshake.
    pub fn new(from: DeviceId, infos: Vec<HandshakeInfo>, reply_requested: bool) -> Self {
        Self {
            from,
            infos,
            reply_requested,
        }
    }
}

/// One log range (plus optional point lookups) a device wants sent to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequestItem {
    #[serde(rename = "userId")]
    pub user_id: UserId,

    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,

    #[serde(rename = "startingSequence")]
    pub starting_sequence: u64,

    /// Last sequence of the range, inclusive.
    #[serde(rename = "sequence")]
    pub ending_sequence: u64,

    #[serde(rename = "missingSequences", with = "sequence_list", default)]
    pub missing_sequences: BTreeSet<u64>,
}

impl SyncRequestItem {
    /// Build the wire item for a reconciled ask.
    pub fn from_ask(ask: &HandshakeInfo) -> Self {
        Self {
            user_id: ask.user_id.clone(),
            device_id: ask.device_id.clone(),
            starting_sequence: ask.start(),
            ending_sequence: ask.sequence,
            missing_sequences: BTreeSet::new(),
        }
    }

    /// The log this item asks about.
    pub fn log_id(&self) -> LogId {
        LogId {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }
}

/// Records a device wants, addressed to exactly one responder.
///
/// The request is broadcast like everything else; devices other than
/// `target_device_id` ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(rename = "targetDeviceId")]
    pub target_device_id: DeviceId,

    #[serde(default)]
    pub items: Vec<SyncRequestItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_decodes_peer_vector() {
        let json = r#"{"from":"E-device","infos":[
            {"deviceId":"A-device","missingMessages":"4,5,6","sequence":10,"userId":"A"},
            {"deviceId":"E-device","missingMessages":"","sequence":10,"userId":"E"}],
            "reply":"false"}"#;
        let msg: HandshakeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.from.as_str(), "E-device");
        assert!(!msg.reply_requested);
        assert_eq!(msg.infos.len(), 2);
        assert_eq!(msg.infos[0].missing, [4, 5, 6].into_iter().collect::<BTreeSet<u64>>());
        assert!(msg.infos[1].missing.is_empty());
        assert_eq!(msg.infos[0].starting_sequence, None);
        assert_eq!(msg.infos[0].from, None);
    }

    #[test]
    fn test_handshake_without_optional_fields() {
        let json = r#"{"from":"B","infos":[{"deviceId":"A-device","sequence":5,"userId":"A"}]}"#;
        let msg: HandshakeMessage = serde_json::from_str(json).unwrap();
        assert!(!msg.reply_requested);
        assert!(msg.infos[0].missing.is_empty());
        assert_eq!(msg.infos[0].profile_sequence, None);
    }

    #[test]
    fn test_internal_ask_fields_stay_off_the_wire() {
        let log = LogId::new("A", "A-device");
        let ask = HandshakeInfo::ask(&log, 6, 10, &DeviceId::from("A-device"));
        let json = serde_json::to_value(&ask).unwrap();
        assert!(json.get("starting_sequence").is_none());
        assert!(json.get("from").is_none());
        assert_eq!(json["missingMessages"], "");
        assert_eq!(ask.start(), 6);
    }

    #[test]
    fn test_sync_request_item_from_ask() {
        let log = LogId::new("A", "A-device");
        let ask = HandshakeInfo::ask(&log, 6, 10, &DeviceId::from("A-device"));
        let item = SyncRequestItem::from_ask(&ask);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["startingSequence"], 6);
        assert_eq!(json["sequence"], 10);
        assert_eq!(json["missingSequences"], "");
        assert_eq!(item.log_id(), log);
    }
}
