//! Orchestrator Types
//!
//! The finalized session record and engine-level snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use consult_session_core::{
    CallKind, CallSessionInfo, CallState, EndReason, PartyId, RequestId, SessionId,
};

/// The audit record persisted exactly once per session, keyed by session
/// id. Writing it again with the same key is harmless (idempotent
/// upsert), so persistence retries cannot duplicate billing records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub request_id: RequestId,
    pub requester: PartyId,
    pub provider: PartyId,
    pub kind: CallKind,
    /// Terminal state: `Ended` or `Error`.
    pub state: CallState,
    pub selected_duration_secs: u64,
    pub elapsed_secs: u64,
    /// Final billed cost in minor units.
    pub final_cost: i64,
    pub currency: String,
    pub end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Build the record from a terminal session snapshot.
    pub fn from_info(info: &CallSessionInfo, request_id: RequestId) -> Self {
        Self {
            session_id: info.id.clone(),
            request_id,
            requester: info.context.requester.clone(),
            provider: info.context.provider.clone(),
            kind: info.kind,
            state: info.state,
            selected_duration_secs: info.selected_duration_secs,
            elapsed_secs: info.elapsed_secs,
            final_cost: info.final_cost.unwrap_or(0),
            currency: info.currency.clone(),
            end_reason: info.end_reason.clone(),
            created_at: info.created_at,
            connected_at: info.connected_at,
            ended_at: info.ended_at,
        }
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Sessions currently connecting or connected.
    pub active_sessions: usize,
    /// All sessions the engine still tracks, terminal included.
    pub total_sessions: usize,
    /// Requests still pending in the registry.
    pub pending_requests: usize,
    /// Providers the presence tracker has ever observed.
    pub tracked_providers: usize,
}
