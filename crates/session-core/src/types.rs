//! Core Identifier and Session Types
//!
//! Opaque identifiers and the public session vocabulary shared across the
//! consult stack. Participant references are opaque: resolving them to
//! display data is the identity store's job, never the engine's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incoming call request ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(format!("request-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a participant (requester or provider).
///
/// The engine never inspects these; the identity/profile store owns the
/// mapping to real user data.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PartyId(pub String);

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit per-call participant context.
///
/// Passed into every engine entry point instead of being read from shared
/// ambient state, so concurrent sessions cannot race on a global flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub requester: PartyId,
    pub provider: PartyId,
}

impl SessionContext {
    pub fn new(requester: PartyId, provider: PartyId) -> Self {
        Self { requester, provider }
    }
}

/// Kind of consultation call
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallKind {
    Audio,
    Video,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallKind::Audio => write!(f, "audio"),
            CallKind::Video => write!(f, "video"),
        }
    }
}

/// Call session state machine.
///
/// `Choosing` is the caller-side pre-session state (duration/kind
/// selection); sessions themselves are only ever created in `Connecting`.
/// `Ended` and `Error` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    Choosing,
    Connecting,
    Connected,
    Ended,
    Error,
}

impl CallState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Error)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Choosing => write!(f, "choosing"),
            CallState::Connecting => write!(f, "connecting"),
            CallState::Connected => write!(f, "connected"),
            CallState::Ended => write!(f, "ended"),
            CallState::Error => write!(f, "error"),
        }
    }
}

/// Why a session reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// A participant hung up.
    Hangup,
    /// Selected duration ran out and the caller chose not to extend.
    TimeExpired,
    /// The media channel failed (setup, timeout, or mid-call drop).
    ChannelFailure(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Hangup => write!(f, "hangup"),
            EndReason::TimeExpired => write!(f, "time expired"),
            EndReason::ChannelFailure(e) => write!(f, "channel failure: {}", e),
        }
    }
}

/// Point-in-time public snapshot of a call session.
///
/// This is what observers (UI, persistence) see; the live aggregate stays
/// inside [`crate::session::CallSession`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSessionInfo {
    pub id: SessionId,
    pub context: SessionContext,
    pub kind: CallKind,
    pub state: CallState,
    pub selected_duration_secs: u64,
    pub elapsed_secs: u64,
    /// Accrued cost so far, in minor units.
    pub accrued_cost: i64,
    /// Final cost, in minor units. Set exactly once, on the terminal
    /// transition.
    pub final_cost: Option<i64>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    /// Derived: elapsed time has passed the selected duration. Billing
    /// continues at the same rate; this is not a state of its own.
    pub overtime: bool,
}
