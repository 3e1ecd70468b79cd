//! Log records.
//!
//! A [`SyncRecord`] is one entry of one log. Records are immutable once
//! authored; the only slot that may ever change is a [`RecordKind::Missing`]
//! placeholder, which a receiver writes to mark a hole and later replaces
//! with the real record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CoreError;
use crate::types::{DeviceId, LogId, RecordKey, UserId};

/// What a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A chat message.
    Chat,
    /// A profile photo update. The latest one per log is the user's avatar.
    Photo,
    /// Local placeholder for a record that is known to exist but not yet held.
    /// Never sent to peers.
    Missing,
}

impl RecordKind {
    /// Stable string form, used in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Chat => "Chat",
            RecordKind::Photo => "Photo",
            RecordKind::Missing => "Missing",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Chat" => Ok(RecordKind::Chat),
            "Photo" => Ok(RecordKind::Photo),
            "Missing" => Ok(RecordKind::Missing),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

/// A single log entry as stored and as carried in `syncInfoMessage` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    #[serde(rename = "userId")]
    pub user_id: UserId,

    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,

    pub sequence: u64,

    #[serde(rename = "messageType")]
    pub kind: RecordKind,

    /// Message text, or an encoded photo for [`RecordKind::Photo`].
    #[serde(rename = "message", default)]
    pub payload: String,

    #[serde(
        rename = "recipientUserId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recipient_user_id: Option<UserId>,

    /// Author-side timestamp, milliseconds since the Unix epoch.
    #[serde(rename = "loggedAt", default)]
    pub logged_at: u64,

    /// Device that put this copy on the wire. Differs from `device_id`
    /// whenever a record is forwarded by a peer.
    pub sender: DeviceId,
}

impl SyncRecord {
    /// Create a record authored locally. The sender is the author device.
    pub fn new(log: &LogId, sequence: u64, kind: RecordKind, payload: impl Into<String>) -> Self {
        Self {
            user_id: log.user_id.clone(),
            device_id: log.device_id.clone(),
            sequence,
            kind,
            payload: payload.into(),
            recipient_user_id: None,
            logged_at: now_millis(),
            sender: log.device_id.clone(),
        }
    }

    /// Create a placeholder marking a hole at `sequence`.
    pub fn placeholder(log: &LogId, sequence: u64, observer: &DeviceId) -> Self {
        Self {
            user_id: log.user_id.clone(),
            device_id: log.device_id.clone(),
            sequence,
            kind: RecordKind::Missing,
            payload: String::new(),
            recipient_user_id: None,
            logged_at: now_millis(),
            sender: observer.clone(),
        }
    }

    /// Address the record to a single user.
    pub fn with_recipient(mut self, recipient: impl Into<UserId>) -> Self {
        self.recipient_user_id = Some(recipient.into());
        self
    }

    /// Set the forwarding device.
    pub fn with_sender(mut self, sender: DeviceId) -> Self {
        self.sender = sender;
        self
    }

    /// The log this record belongs to.
    pub fn log_id(&self) -> LogId {
        LogId {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// Global identity of this record.
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.log_id(), self.sequence)
    }

    /// True for local [`RecordKind::Missing`] placeholders.
    pub fn is_placeholder(&self) -> bool {
        self.kind == RecordKind::Missing
    }
}

/// Get the current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
