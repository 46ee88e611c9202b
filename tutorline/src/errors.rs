//! Error taxonomy for a realtime tutor call.
//!
//! Fatal kinds abort call setup and are surfaced to the caller. Recoverable
//! kinds are handled inside the session (logged, skipped or retried) and only
//! show up to the user as status changes such as "reconnecting".

use thiserror::Error;

/// Errors that can occur while setting up or running a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Microphone permission was refused
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// The credential provider has no secret configured
    #[error("Credential not configured: {0}")]
    NotConfigured(String),

    /// Remote closed with a protocol or authentication failure
    #[error("Protocol error (code {code}): {reason}")]
    ProtocolError { code: u16, reason: String },

    /// Transport closed abnormally (no close frame / network failure)
    #[error("Transport dropped: {0}")]
    TransportDropped(String),

    /// A single playback chunk failed
    #[error("Playback failure: {0}")]
    PlaybackFailure(String),

    /// Malformed inbound message
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Capture or per-chunk send failure
    #[error("Capture failure: {0}")]
    CaptureFailure(String),

    /// Could not open the duplex connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

impl CallError {
    /// Whether this error comes from the caller's setup (permission,
    /// credential, configuration or authentication) rather than the network.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::PermissionDenied
                | CallError::NotConfigured(_)
                | CallError::ProtocolError { .. }
                | CallError::InvalidConfiguration(_)
        )
    }

    /// Whether the resilience manager may retry after this error. Anything
    /// else ends the reconnect loop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::TransportDropped(_) | CallError::ConnectionFailed(_)
        )
    }
}

impl From<std::io::Error> for CallError {
    fn from(err: std::io::Error) -> Self {
        CallError::Io(err.to_string())
    }
}

/// Result type for call operations.
pub type CallResult<T> = Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CallError::PermissionDenied.is_fatal());
        assert!(CallError::NotConfigured("missing".into()).is_fatal());
        assert!(
            CallError::ProtocolError {
                code: 1008,
                reason: "auth".into()
            }
            .is_fatal()
        );
        assert!(!CallError::TransportDropped("eof".into()).is_fatal());
        assert!(!CallError::PlaybackFailure("x".into()).is_fatal());
        assert!(!CallError::ParseError("x".into()).is_fatal());
        assert!(!CallError::CaptureFailure("x".into()).is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CallError::TransportDropped("eof".into()).is_retryable());
        assert!(CallError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!CallError::NotConfigured("missing".into()).is_retryable());
        assert!(!CallError::ParseError("html".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = CallError::ProtocolError {
            code: 1008,
            reason: "invalid api key".into(),
        };
        assert_eq!(err.to_string(), "Protocol error (code 1008): invalid api key");
    }
}
