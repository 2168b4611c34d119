//! Error types for MATBC sessions

use thiserror::Error;

use crate::ObjectId;

/// Core MATBC errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatbcError {
    // Scenario errors
    #[error("Malformed command at line {line}: {reason}")]
    MalformedCommand { line: usize, reason: String },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    // Sequencing errors
    #[error("Duplicate or out-of-order message: expected seq {expected}, got {actual}")]
    DuplicateOrOutOfOrderMessage { expected: u64, actual: u64 },

    // Link errors
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Session aborted: peer did not reconnect within the grace period")]
    SessionAborted,

    #[error("Outbound buffer full ({0} messages)")]
    OutboundFull(usize),

    #[error("Transport error: {0}")]
    TransportError(String),

    // Matching errors
    #[error("Invalid selection: unknown object {0}")]
    InvalidSelection(ObjectId),

    #[error("Round already resolved")]
    RoundAlreadyResolved,

    #[error("No matching round in progress")]
    NoActiveRound,
}

impl MatbcError {
    /// Errors that end the session for both participants.
    ///
    /// Everything else is absorbed locally and only reflected in logs.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            MatbcError::SessionAborted | MatbcError::MalformedCommand { .. }
        )
    }

    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        MatbcError::MalformedCommand {
            line,
            reason: reason.into(),
        }
    }
}

/// Result type for MATBC operations
pub type MatbcResult<T> = Result<T, MatbcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(MatbcError::SessionAborted.is_session_fatal());
        assert!(MatbcError::malformed(3, "bad time").is_session_fatal());
        assert!(!MatbcError::RoundAlreadyResolved.is_session_fatal());
        assert!(!MatbcError::InvalidSelection(ObjectId::new(9)).is_session_fatal());
        assert!(!MatbcError::ConnectionLost("reset".into()).is_session_fatal());
    }

    #[test]
    fn test_malformed_message_names_line() {
        let err = MatbcError::malformed(12, "unknown task 'foo'");
        assert_eq!(
            err.to_string(),
            "Malformed command at line 12: unknown task 'foo'"
        );
    }
}
