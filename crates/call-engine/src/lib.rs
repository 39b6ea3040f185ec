//! # Consult Call Engine
//!
//! Orchestration for live audio/video consultations on top of
//! `consult-session-core`: provider presence gating, incoming request
//! handling with TTL expiry, session creation and finalization, paid
//! mid-call extensions with signature-verified payments, and idempotent
//! persistence of the billed outcome.
//!
//! ## Flow
//!
//! ```text
//! PresenceTracker ── gates ──▶ IncomingCallRegistry
//!                                    │ accept
//!                                    ▼
//!                               CallEngine ── open ──▶ MediaChannelProvider
//!                                    │
//!                          CallSession + SessionTimer
//!                                    │ end / channel failure
//!                                    ▼
//!                         SessionRecordStore (idempotent upsert)
//! ```
//!
//! External collaborators — media transport, payment processor,
//! persistence — are ports; see [`payment::PaymentProcessor`],
//! [`database::SessionRecordStore`], and
//! `consult_session_core::MediaChannelProvider`.

pub mod config;
pub mod database;
pub mod error;
pub mod extension;
pub mod orchestrator;
pub mod payment;
pub mod presence;
pub mod registry;

pub use config::{CallEngineConfig, GeneralConfig, PersistenceConfig};
pub use error::{
    CallEngineError, ExtensionError, PaymentError, PersistenceError, PresenceError, RequestError,
    Result,
};
pub use orchestrator::{CallEngine, EngineStats, SessionRecord};

/// Common imports for engine users.
pub mod prelude {
    pub use crate::config::CallEngineConfig;
    pub use crate::database::{MemoryRecordStore, SessionRecordStore, SqliteRecordStore};
    pub use crate::error::{
        CallEngineError, ExtensionError, PaymentError, PersistenceError, PresenceError,
        RequestError,
    };
    pub use crate::extension::{ExtensionCoordinator, ExtensionRequest};
    pub use crate::orchestrator::{CallEngine, EngineStats, SessionRecord};
    pub use crate::payment::{PaymentProcessor, PaymentProof, SignatureVerifier};
    pub use crate::presence::{PresenceStatus, PresenceTracker, ProviderPresence};
    pub use crate::registry::{IncomingCallRegistry, IncomingCallRequest, RequestStatus};

    pub use consult_session_core::{
        BillingParams, CallKind, CallSession, CallSessionInfo, CallState, ChannelError, EndReason,
        MediaChannel, MediaChannelEvent, MediaChannelHandle, MediaChannelProvider, MinorUnits,
        PartyId, RequestId, SessionContext, SessionEvent, SessionId,
    };
}
