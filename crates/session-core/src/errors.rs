//! Error Types for Session Core

use thiserror::Error;

use crate::types::CallState;

/// Main result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for session operations
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The session is not in a state that admits the requested operation
    #[error("invalid state for {operation}: session is {actual}")]
    InvalidState {
        operation: &'static str,
        actual: CallState,
    },

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn invalid_state(operation: &'static str, actual: CallState) -> Self {
        SessionError::InvalidState { operation, actual }
    }

    pub fn session_not_found(session_id: &str) -> Self {
        SessionError::SessionNotFound(session_id.to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        SessionError::Internal(msg.into())
    }
}
