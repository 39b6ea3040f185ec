//! Session Event System
//!
//! Simple event system using tokio::sync::broadcast. The engine publishes
//! request, session, billing, and extension transitions here; observers
//! (UI adapters, metrics) subscribe without the engine holding any UI
//! state.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{CallKind, CallState, EndReason, PartyId, RequestId, SessionId};

/// Events published through the session event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// An incoming call request was created and offered to a provider.
    IncomingRequest {
        request_id: RequestId,
        requester: PartyId,
        provider: PartyId,
        kind: CallKind,
    },

    /// A pending request was accepted.
    RequestAccepted { request_id: RequestId },

    /// A pending request was declined by the provider.
    RequestDeclined { request_id: RequestId },

    /// A pending request outlived its TTL. Emitted so any ringing UI can
    /// be cancelled; expiry is never silent.
    RequestExpired { request_id: RequestId },

    /// A session was created from an accepted request.
    SessionCreated {
        session_id: SessionId,
        request_id: RequestId,
        requester: PartyId,
        provider: PartyId,
        kind: CallKind,
    },

    /// Session state changed.
    StateChanged {
        session_id: SessionId,
        old_state: CallState,
        new_state: CallState,
    },

    /// One billing tick was applied while connected.
    BillingTick {
        session_id: SessionId,
        elapsed_secs: u64,
        accrued_cost: i64,
    },

    /// Elapsed time passed the selected duration. Billing continues at
    /// the same rate; this only marks the boundary.
    OvertimeStarted {
        session_id: SessionId,
        elapsed_secs: u64,
    },

    /// An extension was requested and priced, payment not yet confirmed.
    ExtensionRequested {
        session_id: SessionId,
        additional_minutes: u32,
        cost: i64,
    },

    /// A paid-for extension was applied to the running session.
    ExtensionApplied {
        session_id: SessionId,
        additional_minutes: u32,
        new_duration_secs: u64,
    },

    /// A session reached a terminal state and its final cost is fixed.
    SessionTerminated {
        session_id: SessionId,
        state: CallState,
        elapsed_secs: u64,
        final_cost: i64,
        reason: EndReason,
    },

    /// Non-fatal error surfaced to observers.
    Error {
        session_id: Option<SessionId>,
        error: String,
    },
}

/// Broadcast-based publisher for [`SessionEvent`].
///
/// Cloning shares the underlying channel. Publishing never fails: events
/// with no live subscriber are simply dropped.
#[derive(Debug, Clone)]
pub struct SessionEventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = SessionEventBus::default();
        let mut rx = bus.subscribe();

        let id = RequestId::new();
        bus.publish(SessionEvent::RequestExpired {
            request_id: id.clone(),
        });

        match rx.recv().await.unwrap() {
            SessionEvent::RequestExpired { request_id } => assert_eq!(request_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = SessionEventBus::default();
        bus.publish(SessionEvent::RequestDeclined {
            request_id: RequestId::new(),
        });
    }
}
