//! Incoming Call Request Registry
//!
//! Holds call requests from creation until a terminal status. The status
//! field is the one piece of state mutated by concurrent actors (provider
//! action vs. background sweep), so every transition happens under the
//! per-entry lock with compare-and-set semantics: exactly one actor wins,
//! terminal statuses are immutable.
//!
//! Expiry is lazy: a pending request past its deadline is reported expired
//! by any reader, and the losing `accept`/`decline` or the sweep
//! formalizes the transition. It is never deleted silently — expired
//! requests are surfaced so a ringing UI can be cancelled.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use consult_session_core::{BillingParams, CallKind, RequestId, SessionContext};

use crate::error::{PresenceError, RequestError};
use crate::presence::PresenceTracker;

/// Lifecycle of an incoming call request. `Pending` is the only
/// non-terminal status.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Accepted => write!(f, "accepted"),
            RequestStatus::Declined => write!(f, "declined"),
            RequestStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A call request offered to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCallRequest {
    pub id: RequestId,
    pub context: SessionContext,
    pub kind: CallKind,
    /// Name of the media channel a session created from this request will
    /// open.
    pub channel_name: String,
    /// Billing parameters fixed at request time, copied into the session
    /// unchanged on accept.
    pub billing: BillingParams,
    pub selected_duration_secs: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: RequestStatus,
}

impl IncomingCallRequest {
    fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Registry of incoming call requests, gated by provider presence.
pub struct IncomingCallRegistry {
    requests: DashMap<RequestId, IncomingCallRequest>,
    presence: Arc<PresenceTracker>,
    ttl: Duration,
}

impl IncomingCallRegistry {
    pub fn new(presence: Arc<PresenceTracker>, ttl: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            presence,
            ttl,
        }
    }

    /// Offer a call request to a provider.
    ///
    /// Fails unless the provider's effective presence is `Online`; a
    /// request that cannot be answered is never created.
    pub fn create_request(
        &self,
        context: &SessionContext,
        kind: CallKind,
        billing: BillingParams,
        selected_duration_secs: u64,
    ) -> std::result::Result<IncomingCallRequest, PresenceError> {
        let status = self.presence.effective_status(&context.provider);
        if !self.presence.is_available(&context.provider) {
            return Err(PresenceError::ProviderUnavailable {
                provider: context.provider.clone(),
                status,
            });
        }

        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or_else(|_| ChronoDuration::seconds(60));
        let request = IncomingCallRequest {
            id: RequestId::new(),
            context: context.clone(),
            kind,
            channel_name: format!("channel-{}", uuid::Uuid::new_v4()),
            billing,
            selected_duration_secs,
            created_at: now,
            expires_at: now + ttl,
            status: RequestStatus::Pending,
        };
        tracing::info!(
            "Request {} offered to provider {} ({} call)",
            request.id,
            context.provider,
            kind
        );
        self.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    /// Accept a pending request. The only valid trigger for creating a
    /// session from it.
    pub fn accept(&self, request_id: &RequestId) -> std::result::Result<IncomingCallRequest, RequestError> {
        self.accept_at(request_id, Utc::now())
    }

    pub(crate) fn accept_at(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> std::result::Result<IncomingCallRequest, RequestError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| RequestError::NotFound(request_id.clone()))?;
        Self::transition(&mut entry, now, RequestStatus::Accepted)?;
        tracing::info!("Request {} accepted", request_id);
        Ok(entry.clone())
    }

    /// Decline a pending request.
    pub fn decline(&self, request_id: &RequestId) -> std::result::Result<(), RequestError> {
        self.decline_at(request_id, Utc::now())
    }

    pub(crate) fn decline_at(
        &self,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), RequestError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| RequestError::NotFound(request_id.clone()))?;
        Self::transition(&mut entry, now, RequestStatus::Declined)?;
        tracing::info!("Request {} declined", request_id);
        Ok(())
    }

    /// Formalize expiry for every pending request past its deadline and
    /// return them. Each request transitions exactly once even under
    /// concurrent sweeps: the re-check under the entry lock is the
    /// compare-and-set.
    pub fn sweep_expired(&self) -> Vec<IncomingCallRequest> {
        self.sweep_expired_at(Utc::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<IncomingCallRequest> {
        let candidates: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|entry| entry.status == RequestStatus::Pending && entry.is_past_deadline(now))
            .map(|entry| entry.id.clone())
            .collect();

        let mut expired = Vec::new();
        for request_id in candidates {
            if let Some(mut entry) = self.requests.get_mut(&request_id) {
                if entry.status == RequestStatus::Pending && entry.is_past_deadline(now) {
                    entry.status = RequestStatus::Expired;
                    tracing::debug!("Request {} expired by sweep", request_id);
                    expired.push(entry.clone());
                }
            }
        }
        expired
    }

    /// Read a request. A pending request past its deadline is reported
    /// `Expired` (lazy expiry applies to every reader), even before a
    /// sweep formalizes it.
    pub fn get(&self, request_id: &RequestId) -> Option<IncomingCallRequest> {
        self.requests.get(request_id).map(|entry| {
            let mut request = entry.clone();
            if request.status == RequestStatus::Pending && request.is_past_deadline(Utc::now()) {
                request.status = RequestStatus::Expired;
            }
            request
        })
    }

    /// Number of requests still pending (deadline not considered).
    pub fn pending_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|entry| entry.status == RequestStatus::Pending)
            .count()
    }

    /// Compare-and-set transition out of `Pending`, run under the entry
    /// lock. A past-deadline request is moved to `Expired` instead of the
    /// requested status, and the caller gets `Expired` back.
    fn transition(
        entry: &mut IncomingCallRequest,
        now: DateTime<Utc>,
        to: RequestStatus,
    ) -> std::result::Result<(), RequestError> {
        if entry.status != RequestStatus::Pending {
            return Err(RequestError::AlreadyResolved(entry.id.clone()));
        }
        if entry.is_past_deadline(now) {
            entry.status = RequestStatus::Expired;
            return Err(RequestError::Expired(entry.id.clone()));
        }
        entry.status = to;
        Ok(())
    }
}
