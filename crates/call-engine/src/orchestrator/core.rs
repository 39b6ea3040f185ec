//! Call Engine
//!
//! The top-level orchestrator: gates requests on provider presence,
//! creates sessions from accepted requests, opens and releases the media
//! channel, drives the billing timer, delegates paid extensions, and
//! finalizes every session exactly once — persisting the outcome with an
//! idempotent upsert and surfacing every transition on the event bus.
//!
//! Spawned tasks (channel monitors, the expiry sweeper) hold only a weak
//! reference to the engine, so dropping the engine shuts them down.

use std::sync::Arc;
use tokio::task::JoinHandle;

use consult_session_core::{
    BillingParams, CallKind, CallSession, CallSessionInfo, ChannelError, EndReason, MediaChannel,
    MediaChannelEvent, MediaChannelProvider, RequestId, SessionContext, SessionError, SessionEvent,
    SessionEventBus, SessionId, SessionTimer, Termination,
};
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::config::CallEngineConfig;
use crate::database::SessionRecordStore;
use crate::error::{PresenceError, RequestError, Result};
use crate::extension::{ExtensionCoordinator, ExtensionRequest};
use crate::orchestrator::persistence;
use crate::orchestrator::types::{EngineStats, SessionRecord};
use crate::payment::{PaymentProcessor, PaymentProof};
use crate::presence::PresenceTracker;
use crate::registry::{IncomingCallRegistry, IncomingCallRequest};

/// The consultation call orchestrator.
pub struct CallEngine {
    config: CallEngineConfig,
    presence: Arc<PresenceTracker>,
    registry: IncomingCallRegistry,
    extensions: ExtensionCoordinator,
    sessions: DashMap<SessionId, CallSession>,
    media: Arc<dyn MediaChannelProvider>,
    records: Arc<dyn SessionRecordStore>,
    events: SessionEventBus,
}

impl CallEngine {
    pub fn new(
        config: CallEngineConfig,
        media: Arc<dyn MediaChannelProvider>,
        payment: Arc<dyn PaymentProcessor>,
        records: Arc<dyn SessionRecordStore>,
    ) -> Arc<Self> {
        let events = SessionEventBus::new(config.general.event_capacity);
        let presence = Arc::new(PresenceTracker::new(config.general.presence_freshness));
        let registry =
            IncomingCallRegistry::new(Arc::clone(&presence), config.general.request_ttl);
        let extensions = ExtensionCoordinator::new(payment, events.clone());

        Arc::new(Self {
            config,
            presence,
            registry,
            extensions,
            sessions: DashMap::new(),
            media,
            records,
            events,
        })
    }

    /// Spawn the background expired-request sweeper. The loop stops on
    /// its own once the engine is dropped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let sweep_interval = self.config.general.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                engine.sweep_expired_requests();
            }
            tracing::debug!("Request sweeper stopped");
        })
    }

    /// Subscribe to request/session/billing transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The presence tracker; push or poll sources feed it via `observe`.
    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn config(&self) -> &CallEngineConfig {
        &self.config
    }

    // ========== Incoming requests ==========

    /// Offer a call request to a provider, gated on presence.
    pub fn request_call(
        &self,
        context: SessionContext,
        kind: CallKind,
        billing: BillingParams,
        selected_duration_secs: u64,
    ) -> std::result::Result<IncomingCallRequest, PresenceError> {
        let request =
            self.registry
                .create_request(&context, kind, billing, selected_duration_secs)?;
        self.events.publish(SessionEvent::IncomingRequest {
            request_id: request.id.clone(),
            requester: context.requester,
            provider: context.provider,
            kind,
        });
        Ok(request)
    }

    /// Decline a pending request; no session state ever existed.
    pub fn decline_request(&self, request_id: &RequestId) -> std::result::Result<(), RequestError> {
        let result = self.registry.decline(request_id);
        match &result {
            Ok(()) => self.events.publish(SessionEvent::RequestDeclined {
                request_id: request_id.clone(),
            }),
            Err(RequestError::Expired(_)) => self.events.publish(SessionEvent::RequestExpired {
                request_id: request_id.clone(),
            }),
            Err(_) => {}
        }
        result
    }

    /// Formalize expiry for overdue pending requests and report them so
    /// any ringing UI is cancelled.
    pub fn sweep_expired_requests(&self) -> Vec<IncomingCallRequest> {
        let expired = self.registry.sweep_expired();
        for request in &expired {
            self.events.publish(SessionEvent::RequestExpired {
                request_id: request.id.clone(),
            });
        }
        expired
    }

    /// Look up a request (lazy expiry applied).
    pub fn get_request(&self, request_id: &RequestId) -> Option<IncomingCallRequest> {
        self.registry.get(request_id)
    }

    // ========== Session lifecycle ==========

    /// Accept a pending request and start its session.
    ///
    /// The returned session is `Connected` on success. Channel failure is
    /// never silent: the session comes back in `Error` state, already
    /// finalized, so the caller observes the failure and any partial
    /// cost.
    pub async fn accept_request(self: &Arc<Self>, request_id: &RequestId) -> Result<CallSession> {
        let request = match self.registry.accept(request_id) {
            Ok(request) => request,
            Err(err) => {
                if matches!(err, RequestError::Expired(_)) {
                    self.events.publish(SessionEvent::RequestExpired {
                        request_id: request_id.clone(),
                    });
                }
                return Err(err.into());
            }
        };
        self.events.publish(SessionEvent::RequestAccepted {
            request_id: request.id.clone(),
        });

        let session = CallSession::new(
            request.id.clone(),
            request.context.clone(),
            request.kind,
            request.billing.clone(),
            request.selected_duration_secs,
            self.events.clone(),
        );
        self.sessions.insert(session.id().clone(), session.clone());
        self.events.publish(SessionEvent::SessionCreated {
            session_id: session.id().clone(),
            request_id: request.id.clone(),
            requester: request.context.requester.clone(),
            provider: request.context.provider.clone(),
            kind: request.kind,
        });

        let opened = tokio::time::timeout(
            self.config.general.connect_timeout,
            self.media.open(&request.channel_name, request.kind),
        )
        .await;

        match opened {
            Ok(Ok(MediaChannel { handle, events })) => {
                if session.mark_connected(handle.clone()).is_err() {
                    // The session terminated while the channel was being
                    // set up; release the channel we just opened.
                    let _ = self.media.close(handle).await;
                    return Ok(session);
                }
                let timer =
                    SessionTimer::spawn(session.clone(), self.config.general.tick_interval);
                session.attach_timer(timer);
                self.spawn_channel_monitor(session.id().clone(), events);
                Ok(session)
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    "Channel setup for session {} failed: {}",
                    session.id(),
                    err
                );
                self.finalize(&session, session.fail(err)).await;
                Ok(session)
            }
            Err(_) => {
                tracing::warn!("Channel setup for session {} timed out", session.id());
                self.finalize(&session, session.fail(ChannelError::Timeout)).await;
                Ok(session)
            }
        }
    }

    /// End a session. Idempotent: repeated calls return the same final
    /// snapshot and never re-finalize.
    pub async fn end_session(
        self: &Arc<Self>,
        session_id: &SessionId,
        reason: EndReason,
    ) -> Result<CallSessionInfo> {
        let session = self.session(session_id).ok_or_else(|| {
            SessionError::session_not_found(&session_id.0)
        })?;
        let termination = session.end(reason);
        Ok(self.finalize(&session, termination).await)
    }

    /// Look up a live session handle.
    pub fn session(&self, session_id: &SessionId) -> Option<CallSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Snapshots of every tracked session.
    pub fn list_sessions(&self) -> Vec<CallSessionInfo> {
        self.sessions.iter().map(|s| s.snapshot()).collect()
    }

    pub fn get_stats(&self) -> EngineStats {
        let active_sessions = self
            .sessions
            .iter()
            .filter(|s| !s.state().is_terminal())
            .count();
        EngineStats {
            active_sessions,
            total_sessions: self.sessions.len(),
            pending_requests: self.registry.pending_count(),
            tracked_providers: self.presence.tracked_providers(),
        }
    }

    // ========== Extensions ==========

    /// Price a mid-call extension for a connected session.
    pub fn request_extension(
        &self,
        session_id: &SessionId,
        additional_minutes: u32,
    ) -> Result<ExtensionRequest> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::session_not_found(&session_id.0))?;
        Ok(self.extensions.request_extension(&session, additional_minutes)?)
    }

    /// Verify the payment proof for the outstanding extension. Billing
    /// keeps ticking at the original parameters while this awaits.
    pub async fn confirm_extension_payment(
        &self,
        session_id: &SessionId,
        proof: PaymentProof,
    ) -> Result<ExtensionRequest> {
        self.extensions.confirm_payment(session_id, proof).await
    }

    /// Apply a confirmed extension to the running session.
    pub fn apply_extension(&self, session_id: &SessionId) -> Result<CallSessionInfo> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::session_not_found(&session_id.0))?;
        self.extensions.apply_extension(&session)
    }

    // ========== Internals ==========

    /// Watch a session's media channel for asynchronous failure.
    fn spawn_channel_monitor(
        self: &Arc<Self>,
        session_id: SessionId,
        mut events: mpsc::Receiver<MediaChannelEvent>,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    MediaChannelEvent::Disconnected { reason } => {
                        let Some(engine) = weak.upgrade() else { break };
                        tracing::warn!(
                            "Channel for session {} disconnected: {}",
                            session_id,
                            reason
                        );
                        engine.handle_channel_disconnect(&session_id, reason).await;
                        break;
                    }
                }
            }
        });
    }

    async fn handle_channel_disconnect(self: &Arc<Self>, session_id: &SessionId, reason: String) {
        let Some(session) = self.session(session_id) else {
            return;
        };
        let termination = session.fail(ChannelError::Disconnected(reason));
        self.finalize(&session, termination).await;
    }

    /// Complete a terminal transition: release the media channel exactly
    /// once, drop any pending extension, and persist the record.
    ///
    /// Only the call that actually performed the transition carries the
    /// channel handle and runs the cleanup; late callers get the existing
    /// snapshot back.
    async fn finalize(
        self: &Arc<Self>,
        session: &CallSession,
        termination: Termination,
    ) -> CallSessionInfo {
        if termination.already_terminal {
            return termination.info;
        }

        if let Some(handle) = termination.channel {
            if let Err(err) = self.media.close(handle).await {
                tracing::warn!(
                    "Releasing channel for session {} failed: {}",
                    session.id(),
                    err
                );
            }
        }
        self.extensions.cancel(session.id());

        let record = SessionRecord::from_info(&termination.info, session.request_id().clone());
        match self.records.upsert_session_record(&record).await {
            Ok(()) => {}
            Err(err) => {
                // The caller is not blocked on persistence; hand the
                // record to the background retry loop.
                tracing::warn!(
                    "Inline persist for session {} failed: {}; retrying in background",
                    session.id(),
                    err
                );
                persistence::persist_finalized(
                    Arc::clone(&self.records),
                    record,
                    self.config.persistence.clone(),
                );
            }
        }

        termination.info
    }
}
