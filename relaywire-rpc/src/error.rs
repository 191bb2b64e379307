//! RPC error types and error codes.

use relaywire_codec::CodecError;
use relaywire_transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes carried in failure envelopes.
///
/// These codes cross the peer boundary and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkError,
    Timeout,
    SerializationError,
    ValidationError,
    RateLimited,
    CircuitOpen,
    MiddlewareError,
    InternalError,
    RemoteError,
}

impl ErrorCode {
    /// Returns whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::Timeout
                | ErrorCode::RateLimited
                | ErrorCode::CircuitOpen
        )
    }

    /// Parses the wire form of a code.
    pub fn parse(s: &str) -> Option<Self> {
        let code = match s {
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "TIMEOUT" => ErrorCode::Timeout,
            "SERIALIZATION_ERROR" => ErrorCode::SerializationError,
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "RATE_LIMITED" => ErrorCode::RateLimited,
            "CIRCUIT_OPEN" => ErrorCode::CircuitOpen,
            "MIDDLEWARE_ERROR" => ErrorCode::MiddlewareError,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            "REMOTE_ERROR" => ErrorCode::RemoteError,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NetworkError => write!(f, "NETWORK_ERROR"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            ErrorCode::ValidationError => write!(f, "VALIDATION_ERROR"),
            ErrorCode::RateLimited => write!(f, "RATE_LIMITED"),
            ErrorCode::CircuitOpen => write!(f, "CIRCUIT_OPEN"),
            ErrorCode::MiddlewareError => write!(f, "MIDDLEWARE_ERROR"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
            ErrorCode::RemoteError => write!(f, "REMOTE_ERROR"),
        }
    }
}

/// RPC errors.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited")]
    RateLimited,

    #[error("circuit open")]
    CircuitOpen,

    #[error("blocked by middleware: {0}")]
    Middleware(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("remote error: {message}")]
    Remote {
        code: Option<ErrorCode>,
        message: String,
    },
}

impl RpcError {
    /// Returns the stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::Transport(e) if e.is_format() => ErrorCode::SerializationError,
            RpcError::Transport(_) => ErrorCode::NetworkError,
            RpcError::Codec(_) | RpcError::MalformedEnvelope(_) => ErrorCode::SerializationError,
            RpcError::Timeout { .. } => ErrorCode::Timeout,
            RpcError::Validation(_) => ErrorCode::ValidationError,
            RpcError::RateLimited => ErrorCode::RateLimited,
            RpcError::CircuitOpen => ErrorCode::CircuitOpen,
            RpcError::Middleware(_) => ErrorCode::MiddlewareError,
            RpcError::Internal(_) => ErrorCode::InternalError,
            RpcError::Remote { .. } => ErrorCode::RemoteError,
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Remote { code, .. } => code.map(|c| c.is_retryable()).unwrap_or(false),
            other => other.code().is_retryable(),
        }
    }

    /// Builds a remote error from the error string of a failure envelope.
    ///
    /// Strings of the form `CODE: message` keep their code.
    pub fn from_remote(error: &str) -> Self {
        match error.split_once(": ") {
            Some((code, message)) if ErrorCode::parse(code).is_some() => RpcError::Remote {
                code: ErrorCode::parse(code),
                message: message.to_string(),
            },
            _ => RpcError::Remote {
                code: None,
                message: error.to_string(),
            },
        }
    }

    /// Renders this error for a failure envelope.
    pub fn to_envelope_error(&self) -> String {
        let message = match self {
            RpcError::Remote { message, .. }
            | RpcError::Validation(message)
            | RpcError::Middleware(message)
            | RpcError::Internal(message)
            | RpcError::MalformedEnvelope(message) => message.clone(),
            other => other.to_string(),
        };
        format!("{}: {}", self.code(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_retryable() {
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(ErrorCode::CircuitOpen.is_retryable());

        assert!(!ErrorCode::SerializationError.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::MiddlewareError.is_retryable());
        assert!(!ErrorCode::InternalError.is_retryable());
        assert!(!ErrorCode::RemoteError.is_retryable());
    }

    #[test]
    fn test_error_code_display_matches_serde() {
        for code in [
            ErrorCode::NetworkError,
            ErrorCode::Timeout,
            ErrorCode::SerializationError,
            ErrorCode::ValidationError,
            ErrorCode::RateLimited,
            ErrorCode::CircuitOpen,
            ErrorCode::MiddlewareError,
            ErrorCode::InternalError,
            ErrorCode::RemoteError,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code));
            assert_eq!(ErrorCode::parse(&code.to_string()), Some(code));
        }
        assert_eq!(ErrorCode::parse("NOPE"), None);
    }

    #[test]
    fn test_codes() {
        let err = RpcError::from(TransportError::Closed);
        assert_eq!(err.code(), ErrorCode::NetworkError);

        let err = RpcError::from(TransportError::UnknownMarker(8));
        assert_eq!(err.code(), ErrorCode::SerializationError);

        let err = RpcError::Timeout { timeout_ms: 50 };
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "request timed out after 50ms");
    }

    #[test]
    fn test_remote_error_parsing() {
        let err = RpcError::from_remote("VALIDATION_ERROR: name is required");
        match &err {
            RpcError::Remote { code, message } => {
                assert_eq!(*code, Some(ErrorCode::ValidationError));
                assert_eq!(message, "name is required");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!err.is_retryable());

        let err = RpcError::from_remote("RATE_LIMITED: slow down");
        assert!(err.is_retryable());

        let err = RpcError::from_remote("player not found");
        assert!(matches!(err, RpcError::Remote { code: None, .. }));
    }

    #[test]
    fn test_envelope_error_rendering() {
        let err = RpcError::Internal("boom".into());
        assert_eq!(err.to_envelope_error(), "INTERNAL_ERROR: boom");

        let err = RpcError::RateLimited;
        assert_eq!(err.to_envelope_error(), "RATE_LIMITED: rate limited");
    }
}
