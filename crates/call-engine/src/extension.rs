//! Extension Coordinator
//!
//! Mid-call duration extensions with payment verification. The flow is
//! strict: price the extension, verify the processor's proof, and only
//! then mutate the running session's duration. There is no provisional
//! application — an unconfirmed extension never touches the session, and
//! the timer keeps billing at the original parameters while payment is in
//! flight.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use consult_session_core::{
    billing, CallSession, CallSessionInfo, CallState, MinorUnits, SessionEvent, SessionEventBus,
    SessionId,
};

use crate::error::{CallEngineError, ExtensionError, PaymentError};
use crate::payment::{PaymentProcessor, PaymentProof};

/// An in-flight extension negotiation. Ephemeral: lives only until it is
/// applied, cancelled, or its session terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub session_id: SessionId,
    pub additional_minutes: u32,
    /// Price of the extension in minor units. Extensions carry no
    /// free-minutes discount.
    pub cost: MinorUnits,
    pub currency: String,
    /// Processor order this extension is to be paid under; the proof must
    /// reference the same order.
    pub order_id: String,
    /// Processor payment reference, set on confirmation.
    pub payment_ref: Option<String>,
    pub confirmed: bool,
    pub requested_at: DateTime<Utc>,
}

/// Coordinates paid extensions, one outstanding request per session.
pub struct ExtensionCoordinator {
    pending: DashMap<SessionId, ExtensionRequest>,
    processor: Arc<dyn PaymentProcessor>,
    events: SessionEventBus,
}

impl ExtensionCoordinator {
    pub fn new(processor: Arc<dyn PaymentProcessor>, events: SessionEventBus) -> Self {
        Self {
            pending: DashMap::new(),
            processor,
            events,
        }
    }

    /// Price an extension for a connected session.
    ///
    /// Only one extension may be outstanding per session; a second
    /// request while the first is unconfirmed fails with
    /// `ExtensionInProgress`.
    pub fn request_extension(
        &self,
        session: &CallSession,
        additional_minutes: u32,
    ) -> std::result::Result<ExtensionRequest, ExtensionError> {
        let state = session.state();
        if state != CallState::Connected {
            return Err(ExtensionError::InvalidState(state));
        }

        let request = match self.pending.entry(session.id().clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ExtensionError::ExtensionInProgress(session.id().clone()));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let request = ExtensionRequest {
                    session_id: session.id().clone(),
                    additional_minutes,
                    cost: billing::extension_cost(additional_minutes, session.billing()),
                    currency: session.billing().currency.clone(),
                    order_id: format!("order-{}", uuid::Uuid::new_v4()),
                    payment_ref: None,
                    confirmed: false,
                    requested_at: Utc::now(),
                };
                vacant.insert(request.clone());
                request
            }
        };

        tracing::info!(
            "Extension of {} min requested for session {} at {}",
            additional_minutes,
            session.id(),
            billing::format_amount(request.cost, &request.currency)
        );
        self.events.publish(SessionEvent::ExtensionRequested {
            session_id: request.session_id.clone(),
            additional_minutes,
            cost: request.cost,
        });
        Ok(request)
    }

    /// Verify a payment proof against the outstanding extension.
    ///
    /// On any failure the extension stays unconfirmed and the session is
    /// untouched; the caller may retry with a fresh proof.
    pub async fn confirm_payment(
        &self,
        session_id: &SessionId,
        proof: PaymentProof,
    ) -> std::result::Result<ExtensionRequest, CallEngineError> {
        // Snapshot what we need, then verify without holding the entry
        // lock: verification awaits and billing ticks keep running.
        let (expected_cost, order_id) = self
            .pending
            .get(session_id)
            .map(|ext| (ext.cost, ext.order_id.clone()))
            .ok_or_else(|| ExtensionError::NoPendingExtension(session_id.clone()))?;

        if proof.order_id != order_id {
            return Err(PaymentError::ProcessorError(format!(
                "proof references order {}, extension was priced under {}",
                proof.order_id, order_id
            ))
            .into());
        }

        self.processor.verify(&proof, expected_cost).await?;

        let mut entry = self
            .pending
            .get_mut(session_id)
            .ok_or_else(|| ExtensionError::NoPendingExtension(session_id.clone()))?;
        entry.confirmed = true;
        entry.payment_ref = Some(proof.payment_id.clone());
        tracing::info!(
            "Extension payment {} confirmed for session {}",
            proof.payment_id,
            session_id
        );
        Ok(entry.clone())
    }

    /// Apply a confirmed extension to the live session.
    ///
    /// The duration grows on the same session object the timer is ticking
    /// against, so the very next tick observes the new duration — no
    /// timer restart, no billing gap, no double-counted time.
    pub fn apply_extension(
        &self,
        session: &CallSession,
    ) -> std::result::Result<CallSessionInfo, CallEngineError> {
        // remove_if is the compare-and-set: only a confirmed entry is
        // taken, and only one caller can take it.
        let (_, extension) = self
            .pending
            .remove_if(session.id(), |_, ext| ext.confirmed)
            .ok_or_else(|| match self.pending.get(session.id()) {
                Some(_) => ExtensionError::NotConfirmed(session.id().clone()),
                None => ExtensionError::NoPendingExtension(session.id().clone()),
            })?;

        let additional_secs = u64::from(extension.additional_minutes) * 60;
        let new_duration = match session.extend_duration(additional_secs) {
            Ok(duration) => duration,
            Err(err) => {
                // The session terminated while payment was in flight; the
                // extension can no longer be applied.
                tracing::warn!(
                    "Confirmed extension for session {} dropped: {}",
                    session.id(),
                    err
                );
                return Err(err.into());
            }
        };

        self.events.publish(SessionEvent::ExtensionApplied {
            session_id: session.id().clone(),
            additional_minutes: extension.additional_minutes,
            new_duration_secs: new_duration,
        });
        Ok(session.snapshot())
    }

    /// Drop any outstanding extension for a session. Called when the
    /// session terminates.
    pub fn cancel(&self, session_id: &SessionId) -> Option<ExtensionRequest> {
        self.pending.remove(session_id).map(|(_, ext)| {
            tracing::debug!("Pending extension for session {} cancelled", session_id);
            ext
        })
    }

    /// The outstanding extension for a session, if any.
    pub fn pending(&self, session_id: &SessionId) -> Option<ExtensionRequest> {
        self.pending.get(session_id).map(|ext| ext.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::SignatureVerifier;
    use consult_session_core::{
        BillingParams, CallKind, MediaChannelHandle, PartyId, RequestId, SessionContext,
    };
    use pretty_assertions::assert_eq;

    const SECRET: &[u8] = b"extension-test-secret";

    fn coordinator() -> ExtensionCoordinator {
        ExtensionCoordinator::new(
            Arc::new(SignatureVerifier::new(SECRET.to_vec())),
            SessionEventBus::default(),
        )
    }

    fn connected_session() -> CallSession {
        let session = CallSession::new(
            RequestId::new(),
            SessionContext::new(PartyId::new("user-1"), PartyId::new("provider-1")),
            CallKind::Video,
            BillingParams::new(1000, "INR", 15),
            900,
            SessionEventBus::default(),
        );
        session
            .mark_connected(MediaChannelHandle("channel-ext-test".into()))
            .unwrap();
        session
    }

    fn proof_for(extension: &ExtensionRequest) -> PaymentProof {
        let signer = SignatureVerifier::new(SECRET.to_vec());
        PaymentProof {
            order_id: extension.order_id.clone(),
            payment_id: "pay-1".into(),
            signature: signer.sign(&extension.order_id, "pay-1"),
            amount: extension.cost,
        }
    }

    #[test]
    fn extensions_are_priced_without_free_minutes() {
        // 10 minutes at rate 10.00/min -> 100.00, despite 15 free minutes
        // on the session itself.
        let coordinator = coordinator();
        let session = connected_session();
        let extension = coordinator.request_extension(&session, 10).unwrap();
        assert_eq!(extension.cost, 10_000);
        assert!(!extension.confirmed);
    }

    #[test]
    fn extensions_require_a_connected_session() {
        let coordinator = coordinator();
        let session = CallSession::new(
            RequestId::new(),
            SessionContext::new(PartyId::new("user-1"), PartyId::new("provider-1")),
            CallKind::Video,
            BillingParams::new(1000, "INR", 0),
            900,
            SessionEventBus::default(),
        );
        // Still connecting.
        assert!(matches!(
            coordinator.request_extension(&session, 10).unwrap_err(),
            ExtensionError::InvalidState(CallState::Connecting)
        ));
    }

    #[test]
    fn only_one_extension_may_be_outstanding() {
        let coordinator = coordinator();
        let session = connected_session();
        coordinator.request_extension(&session, 10).unwrap();
        assert!(matches!(
            coordinator.request_extension(&session, 5).unwrap_err(),
            ExtensionError::ExtensionInProgress(_)
        ));
    }

    #[tokio::test]
    async fn a_failed_payment_leaves_the_session_untouched_and_is_retryable() {
        let coordinator = coordinator();
        let session = connected_session();
        let extension = coordinator.request_extension(&session, 10).unwrap();
        let duration_before = session.snapshot().selected_duration_secs;

        let mut bad = proof_for(&extension);
        bad.signature = "deadbeef".into();
        let err = coordinator
            .confirm_payment(session.id(), bad)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallEngineError::Payment(PaymentError::SignatureMismatch)
        ));
        assert_eq!(session.snapshot().selected_duration_secs, duration_before);
        assert!(!coordinator.pending(session.id()).unwrap().confirmed);

        // Retry with a valid proof succeeds.
        let confirmed = coordinator
            .confirm_payment(session.id(), proof_for(&extension))
            .await
            .unwrap();
        assert!(confirmed.confirmed);
        assert_eq!(confirmed.payment_ref.as_deref(), Some("pay-1"));
    }

    #[tokio::test]
    async fn apply_requires_a_confirmed_payment() {
        let coordinator = coordinator();
        let session = connected_session();
        coordinator.request_extension(&session, 10).unwrap();

        let err = coordinator.apply_extension(&session).unwrap_err();
        assert!(matches!(
            err,
            CallEngineError::Extension(ExtensionError::NotConfirmed(_))
        ));
        assert_eq!(session.snapshot().selected_duration_secs, 900);
    }

    #[tokio::test]
    async fn a_confirmed_extension_grows_the_duration_once() {
        let coordinator = coordinator();
        let session = connected_session();
        let extension = coordinator.request_extension(&session, 10).unwrap();

        coordinator
            .confirm_payment(session.id(), proof_for(&extension))
            .await
            .unwrap();
        let info = coordinator.apply_extension(&session).unwrap();
        assert_eq!(info.selected_duration_secs, 900 + 600);

        // The pending slot is free again; a second apply has nothing to
        // work with.
        assert!(coordinator.pending(session.id()).is_none());
        assert!(matches!(
            coordinator.apply_extension(&session).unwrap_err(),
            CallEngineError::Extension(ExtensionError::NoPendingExtension(_))
        ));
    }

    #[tokio::test]
    async fn a_proof_for_a_different_order_is_rejected() {
        let coordinator = coordinator();
        let session = connected_session();
        let extension = coordinator.request_extension(&session, 10).unwrap();

        let signer = SignatureVerifier::new(SECRET.to_vec());
        let foreign = PaymentProof {
            order_id: "order-someone-else".into(),
            payment_id: "pay-9".into(),
            signature: signer.sign("order-someone-else", "pay-9"),
            amount: extension.cost,
        };
        assert!(matches!(
            coordinator
                .confirm_payment(session.id(), foreign)
                .await
                .unwrap_err(),
            CallEngineError::Payment(PaymentError::ProcessorError(_))
        ));
    }
}
