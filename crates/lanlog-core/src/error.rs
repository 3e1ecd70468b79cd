//! Error types for lanlog core.

use thiserror::Error;

use crate::types::RecordKey;

/// Core errors that can occur while parsing identifiers and wire fields.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid sequence list: {0}")]
    InvalidSequenceList(String),

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    #[error("empty identifier")]
    EmptyIdentifier,
}

/// Validation errors for records and requests received from peers.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("sequence numbers start at 1, got {0}")]
    ZeroSequence(u64),

    #[error("record {0} has an empty user or device id")]
    MissingIdentity(RecordKey),

    #[error("sequence {0} is out of range")]
    SequenceOutOfRange(u64),

    #[error("record {0} is a placeholder and cannot be exchanged")]
    PlaceholderOnWire(RecordKey),

    #[error("request range {start}..={end} is inverted")]
    InvertedRange { start: u64, end: u64 },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        ValidationError::StructuralError(e.to_string())
    }
}
