//! # Consult Session Core
//!
//! The call-session aggregate and billing engine for live audio/video
//! consultations: the `Connecting -> Connected -> Ended/Error` state
//! machine, the per-second tick timer, the pure cost calculator with a
//! free introductory window, and the ports to the external media channel.
//!
//! The orchestration layer on top of this (provider presence, incoming
//! request handling, paid extensions, persistence) lives in
//! `consult-call-engine`.
//!
//! ## Billing invariants
//!
//! - Accrued cost is always *recomputed* from elapsed time, never
//!   incremented, so no code path can double-bill.
//! - Final cost and end timestamp are written exactly once, on the
//!   terminal transition; `end` is idempotent.
//! - Ticks and terminal transitions are serialized per session, so no
//!   tick can land after a session ends.

pub mod billing;
pub mod errors;
pub mod events;
pub mod media;
pub mod session;
pub mod types;

pub use billing::{BillingParams, MinorUnits};
pub use errors::{Result, SessionError};
pub use events::{SessionEvent, SessionEventBus};
pub use media::{
    ChannelError, MediaChannel, MediaChannelEvent, MediaChannelHandle, MediaChannelProvider,
};
pub use session::{CallSession, SessionTimer, Termination, TickOutcome};
pub use types::{
    CallKind, CallSessionInfo, CallState, EndReason, PartyId, RequestId, SessionContext, SessionId,
};
