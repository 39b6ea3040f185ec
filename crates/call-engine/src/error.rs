//! Error Types for the Call Engine
//!
//! One enum per concern, matching how errors propagate: presence and
//! request errors are recovered by the caller, payment errors stay inside
//! the extension flow, channel errors always become a session `Error`
//! transition, persistence errors are retried in the background.

use thiserror::Error;

use consult_session_core::{CallState, ChannelError, PartyId, RequestId, SessionError, SessionId};

use crate::presence::PresenceStatus;

/// The provider cannot be offered a call request right now.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PresenceError {
    /// Effective status was not `Online` (includes stale entries, which
    /// read as offline regardless of stored status).
    #[error("provider {provider} is not available (status: {status})")]
    ProviderUnavailable {
        provider: PartyId,
        status: PresenceStatus,
    },
}

/// Acting on an incoming call request failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("request not found: {0}")]
    NotFound(RequestId),

    /// The request already left `Pending`; terminal statuses are
    /// immutable.
    #[error("request {0} was already resolved")]
    AlreadyResolved(RequestId),

    /// The request outlived its TTL before the action arrived.
    #[error("request {0} expired")]
    Expired(RequestId),
}

/// Extension negotiation failed before any payment was involved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtensionError {
    /// Extensions only apply to connected sessions.
    #[error("session is {0}, extensions require a connected session")]
    InvalidState(CallState),

    /// Only one outstanding extension per session at a time.
    #[error("an extension is already in progress for session {0}")]
    ExtensionInProgress(SessionId),

    /// No extension request exists for this session.
    #[error("no pending extension for session {0}")]
    NoPendingExtension(SessionId),

    /// `apply_extension` was called before payment confirmation.
    #[error("extension for session {0} is not payment-confirmed")]
    NotConfirmed(SessionId),
}

/// Payment verification failed; the running session is unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentError {
    /// The proof's signature does not match the expected signature over
    /// the order/payment pair.
    #[error("payment signature mismatch")]
    SignatureMismatch,

    /// The processor rejected the proof for another reason (malformed
    /// proof, amount mismatch, processor-side failure).
    #[error("payment processor error: {0}")]
    ProcessorError(String),
}

/// Writing a finalized session record failed. Retried with backoff; the
/// in-memory final state stays authoritative until persisted.
#[derive(Debug, Clone, Error)]
#[error("persistence error: {0}")]
pub struct PersistenceError(pub String);

/// Top-level error for engine entry points.
#[derive(Debug, Error)]
pub enum CallEngineError {
    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Main result type for engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;
