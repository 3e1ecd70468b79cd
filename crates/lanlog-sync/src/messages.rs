//! Wire messages.
//!
//! Every payload is a single JSON object whose `message_type` field selects
//! one of three shapes. The field names are shared with other peers on the
//! group and must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;

use lanlog_core::{HandshakeMessage, SyncRecord, SyncRequest};

use crate::error::{Result, SyncError};

/// Message size limits.
pub mod limits {
    /// Largest payload that fits in one UDP datagram.
    pub const MAX_PAYLOAD_BYTES: usize = 65_507;
    /// Maximum log summaries in one handshake.
    pub const MAX_HANDSHAKE_INFOS: usize = 1000;
    /// Maximum items in one sync request.
    pub const MAX_REQUEST_ITEMS: usize = 100;
    /// Maximum explicit sequences in one request item.
    pub const MAX_SEQ_LIST: usize = 1000;
    /// Maximum records in one sync info message.
    pub const MAX_RECORDS_PER_MESSAGE: usize = 100;
}

/// Records sent in answer to a [`SyncRequest`], or announced by their author.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncInfoMessage {
    #[serde(default)]
    pub infos: Vec<SyncRecord>,
}

impl SyncInfoMessage {
    /// Wrap a batch of records.
    pub fn new(infos: Vec<SyncRecord>) -> Self {
        Self { infos }
    }
}

/// The three payload kinds, tagged by `message_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum WireMessage {
    #[serde(rename = "handshaking")]
    Handshake(HandshakeMessage),

    #[serde(rename = "syncInfoRequestMessage")]
    SyncRequest(SyncRequest),

    #[serde(rename = "syncInfoMessage")]
    SyncInfo(SyncInfoMessage),
}

/// Discriminator of a [`WireMessage`], for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Handshake,
    SyncRequest,
    SyncInfo,
}

impl MessageKind {
    /// The `message_type` tag on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Handshake => "handshaking",
            MessageKind::SyncRequest => "syncInfoRequestMessage",
            MessageKind::SyncInfo => "syncInfoMessage",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WireMessage {
    /// Get the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            WireMessage::Handshake(_) => MessageKind::Handshake,
            WireMessage::SyncRequest(_) => MessageKind::SyncRequest,
            WireMessage::SyncInfo(_) => MessageKind::SyncInfo,
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            WireMessage::Handshake(msg) => {
                if msg.infos.len() > limits::MAX_HANDSHAKE_INFOS {
                    return Err("too many handshake infos");
                }
                if msg
                    .infos
                    .iter()
                    .any(|i| i.missing.len() > limits::MAX_SEQ_LIST)
                {
                    return Err("too many missing sequences");
                }
            }
            WireMessage::SyncRequest(req) => {
                if req.items.len() > limits::MAX_REQUEST_ITEMS {
                    return Err("too many request items");
                }
                if req
                    .items
                    .iter()
                    .any(|i| i.missing_sequences.len() > limits::MAX_SEQ_LIST)
                {
                    return Err("too many requested sequences");
                }
            }
            WireMessage::SyncInfo(msg) => {
                if msg.infos.len() > limits::MAX_RECORDS_PER_MESSAGE {
                    return Err("too many records");
                }
            }
        }
        Ok(())
    }

    /// Encode to the JSON text sent on the wire.
    pub fn encode(&self) -> Result<String> {
        let text = serde_json::to_string(self).map_err(|e| SyncError::Encoding(e.to_string()))?;
        if text.len() > limits::MAX_PAYLOAD_BYTES {
            return Err(SyncError::Encoding(format!(
                "{} payload is {} bytes, limit is {}",
                self.kind(),
                text.len(),
                limits::MAX_PAYLOAD_BYTES
            )));
        }
        Ok(text)
    }

    /// Decode and classify a received payload.
    pub fn decode(text: &str) -> Result<Self> {
        if text.len() > limits::MAX_PAYLOAD_BYTES {
            return Err(SyncError::MalformedPayload(format!(
                "payload of {} bytes exceeds limit",
                text.len()
            )));
        }
        let msg: WireMessage =
            serde_json::from_str(text).map_err(|e| SyncError::MalformedPayload(e.to_string()))?;
        msg.validate_limits()
            .map_err(|e| SyncError::MalformedPayload(e.to_string()))?;
        Ok(msg)
    }
}

impl From<HandshakeMessage> for WireMessage {
    fn from(msg: HandshakeMessage) -> Self {
        WireMessage::Handshake(msg)
    }
}

impl From<SyncRequest> for WireMessage {
    fn from(req: SyncRequest) -> Self {
        WireMessage::SyncRequest(req)
    }
}

impl From<SyncInfoMessage> for WireMessage {
    fn from(msg: SyncInfoMessage) -> Self {
        WireMessage::SyncInfo(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanlog_core::{DeviceId, HandshakeInfo, LogId, RecordKind, SyncRequestItem};
    use std::collections::BTreeSet;

    #[test]
    fn test_decode_peer_handshake() {
        let text = r#"{"from":"E-device","infos":[{"deviceId":"A-device","missingMessages":"4,5,6","sequence":10,"userId":"A"},{"deviceId":"B-device","missingMessages":"","sequence":10,"userId":"B"},{"deviceId":"E-device","missingMessages":"","sequence":10,"userId":"E"}],"message_type":"handshaking","reply":"false"}"#;
        let msg = WireMessage::decode(text).unwrap();
        let WireMessage::Handshake(hs) = msg else {
            panic!("expected handshake");
        };
        assert_eq!(hs.from, DeviceId::from("E-device"));
        assert_eq!(hs.infos.len(), 3);
        assert_eq!(hs.infos[0].missing, [4, 5, 6].into_iter().collect::<BTreeSet<u64>>());
        assert!(!hs.reply_requested);
    }

    #[test]
    fn test_encode_handshake_shape() {
        let log = LogId::new("A", "A-device");
        let hs = HandshakeMessage::new(
            DeviceId::from("E-device"),
            vec![HandshakeInfo::new(&log, 10).with_missing([4, 5, 6])],
            true,
        );
        let text = WireMessage::from(hs).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["message_type"], "handshaking");
        assert_eq!(value["reply"], "true");
        assert_eq!(value["infos"][0]["missingMessages"], "4,5,6");
        assert_eq!(value["infos"][0]["sequence"], 10);
    }

    #[test]
    fn test_encode_sync_request_shape() {
        let log = LogId::new("A", "A-device");
        let target = DeviceId::from("A-device");
        let req = SyncRequest {
            target_device_id: target.clone(),
            items: vec![SyncRequestItem::from_ask(&HandshakeInfo::ask(
                &log, 6, 10, &target,
            ))],
        };
        let value: serde_json::Value =
            serde_json::from_str(&WireMessage::from(req).encode().unwrap()).unwrap();
        assert_eq!(value["message_type"], "syncInfoRequestMessage");
        assert_eq!(value["targetDeviceId"], "A-device");
        assert_eq!(value["items"][0]["startingSequence"], 6);
        assert_eq!(value["items"][0]["sequence"], 10);
    }

    #[test]
    fn test_sync_info_roundtrip_keeps_records() {
        let log = LogId::new("C", "C-device");
        let records = vec![
            SyncRecord::new(&log, 1, RecordKind::Chat, "one"),
            SyncRecord::new(&log, 2, RecordKind::Photo, "img"),
        ];
        let text = WireMessage::from(SyncInfoMessage::new(records.clone()))
            .encode()
            .unwrap();
        assert!(text.contains(r#""message_type":"syncInfoMessage""#));
        match WireMessage::decode(&text).unwrap() {
            WireMessage::SyncInfo(msg) => assert_eq!(msg.infos, records),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for text in [
            "",
            "not json",
            r#"{"message_type":"somethingElse"}"#,
            r#"{"from":"A","infos":[]}"#,
            r#"{"message_type":"handshaking","infos":[]}"#,
        ] {
            assert!(
                matches!(WireMessage::decode(text), Err(SyncError::MalformedPayload(_))),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_decode_rejects_oversized_batch() {
        let log = LogId::new("C", "C-device");
        let records = (1..=(limits::MAX_RECORDS_PER_MESSAGE as u64 + 1))
            .map(|s| SyncRecord::new(&log, s, RecordKind::Chat, ""))
            .collect();
        let text = serde_json::to_string(&WireMessage::SyncInfo(SyncInfoMessage::new(records)))
            .unwrap();
        assert!(matches!(
            WireMessage::decode(&text),
            Err(SyncError::MalformedPayload(_))
        ));
    }
}
