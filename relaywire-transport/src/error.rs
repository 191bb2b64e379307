//! Transport error types.

use relaywire_codec::CodecError;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("empty transmission")]
    EmptyTransmission,

    #[error("unknown status marker: {0}")]
    UnknownMarker(u8),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("decompressed size {size} exceeds maximum {max}")]
    DecompressedTooLarge { size: usize, max: usize },

    #[error("shape mismatch: marker implies {expected}, payload is {found}")]
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("send on channel '{channel}' failed: {reason}")]
    Send { channel: String, reason: String },

    #[error("no responder registered for channel '{channel}'")]
    Unreachable { channel: String },

    #[error("transport shut down")]
    Closed,
}

impl TransportError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Send { .. } | TransportError::Unreachable { .. }
        )
    }

    /// Returns whether this error came from the wire format rather than delivery.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            TransportError::Codec(_)
                | TransportError::EmptyTransmission
                | TransportError::UnknownMarker(_)
                | TransportError::Decompression(_)
                | TransportError::DecompressedTooLarge { .. }
                | TransportError::ShapeMismatch { .. }
        )
    }
}
