//! Strong type definitions for lanlog.
//!
//! User and device identifiers are newtypes so a device id can never be
//! passed where a user id is expected. Both serialize as plain strings.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Identifier of a human participant. A user may own several devices.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

/// Identifier of one installation. Each device authors its own log per user.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create an identifier, rejecting the empty string.
            pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(CoreError::EmptyIdentifier);
                }
                Ok(Self(id))
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for the empty identifier, which only appears in malformed input.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(UserId);
string_id!(DeviceId);

impl DeviceId {
    /// Generate a fresh random device id (16 hex characters).
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }
}

/// One append-only log: the messages a user authored on a single device.
///
/// Sequences within a log start at 1 and have no gaps at the author.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,
}

impl LogId {
    /// Create a log id.
    pub fn new(user_id: impl Into<UserId>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Key of the record at `sequence` in this log.
    pub fn key(&self, sequence: u64) -> RecordKey {
        RecordKey {
            log: self.clone(),
            sequence,
        }
    }
}

impl fmt::Debug for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogId({}@{})", self.user_id, self.device_id)
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.device_id)
    }
}

/// Global identity of one record.
///
/// Displays as `device_user_sequence`, the form peers use when they talk
/// about a record outside of a structured payload.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub log: LogId,
    pub sequence: u64,
}

impl RecordKey {
    /// Create a record key.
    pub fn new(log: LogId, sequence: u64) -> Self {
        Self { log, sequence }
    }

    /// Key of the record immediately before this one in the same log.
    ///
    /// Returns `None` for the first record of a log.
    pub fn prev(&self) -> Option<RecordKey> {
        if self.sequence <= 1 {
            return None;
        }
        Some(self.log.key(self.sequence - 1))
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.log.device_id, self.log.user_id, self.sequence
        )
    }
}
