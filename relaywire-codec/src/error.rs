//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding values.
///
/// Every decode failure carries the byte offset at which it was detected.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated input at byte {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("unknown type tag {tag:#04x} at byte {offset}")]
    UnknownTag { offset: usize, tag: u8 },

    #[error("unexpected type tag {tag:#04x} at byte {offset}")]
    UnexpectedTag { offset: usize, tag: u8 },

    #[error("missing end marker at byte {offset}: expected {expected:#04x}, found {found:#04x}")]
    MissingEnd {
        offset: usize,
        expected: u8,
        found: u8,
    },

    #[error("malformed key/value separator at byte {offset}: found {found:#04x}")]
    BadSeparator { offset: usize, found: u8 },

    #[error("back-reference to unpopulated slot {index} at byte {offset}")]
    DanglingReference { offset: usize, index: u32 },

    #[error("invalid UTF-8 in string at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("duplicate table key at byte {offset}")]
    DuplicateKey { offset: usize },

    #[error("invalid value at byte {offset}: {reason}")]
    InvalidValue { offset: usize, reason: String },

    #[error("{remaining} trailing bytes after value at byte {offset}")]
    TrailingBytes { offset: usize, remaining: usize },

    #[error("recursion limit exceeded (max depth {max_depth})")]
    RecursionLimit { max_depth: usize },

    #[error("value too large to encode: {size} (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("cannot write {kind} value under tag {tag:#04x}")]
    KindMismatch { tag: u8, kind: &'static str },
}

impl CodecError {
    /// Returns the byte offset of a decode failure.
    pub fn offset(&self) -> Option<usize> {
        match self {
            CodecError::Truncated { offset, .. }
            | CodecError::UnknownTag { offset, .. }
            | CodecError::UnexpectedTag { offset, .. }
            | CodecError::MissingEnd { offset, .. }
            | CodecError::BadSeparator { offset, .. }
            | CodecError::DanglingReference { offset, .. }
            | CodecError::InvalidUtf8 { offset }
            | CodecError::DuplicateKey { offset }
            | CodecError::InvalidValue { offset, .. }
            | CodecError::TrailingBytes { offset, .. } => Some(*offset),
            CodecError::RecursionLimit { .. }
            | CodecError::TooLarge { .. }
            | CodecError::KindMismatch { .. } => None,
        }
    }

    /// Returns whether this error came from reading malformed input.
    pub fn is_decode(&self) -> bool {
        self.offset().is_some()
    }
}
