//! Call Session Aggregate
//!
//! The single source of truth for one consultation call: participants,
//! billing parameters, timer-driven elapsed time and accrued cost, and the
//! `Connecting -> Connected -> Ended/Error` state machine.
//!
//! All mutation goes through the interior write lock, which is the
//! per-session serialization point: a tick can never interleave with a
//! terminal transition, and `end`/`fail` are idempotent with a write-once
//! final cost.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::billing::{self, BillingParams};
use crate::errors::{Result, SessionError};
use crate::events::{SessionEvent, SessionEventBus};
use crate::media::{ChannelError, MediaChannelHandle};
use crate::session::timer::SessionTimer;
use crate::types::{
    CallKind, CallSessionInfo, CallState, EndReason, RequestId, SessionContext, SessionId,
};

/// Outcome of applying one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick was applied while connected.
    Applied {
        elapsed_secs: u64,
        accrued_cost: i64,
    },
    /// The session is no longer connected; the timer should stop.
    Stopped,
}

/// Result of a terminal transition.
///
/// `channel` is `Some` only for the call that actually performed the
/// transition, so the media channel is released exactly once no matter how
/// many times `end` is invoked.
#[derive(Debug)]
pub struct Termination {
    pub info: CallSessionInfo,
    pub channel: Option<MediaChannelHandle>,
    /// True when the session was already terminal and nothing changed.
    pub already_terminal: bool,
}

#[derive(Debug)]
struct SessionInner {
    state: CallState,
    channel: Option<MediaChannelHandle>,
    timer: Option<SessionTimer>,
    selected_duration_secs: u64,
    elapsed_secs: u64,
    accrued_cost: i64,
    final_cost: Option<i64>,
    connected_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
    overtime_announced: bool,
}

#[derive(Debug)]
struct SessionShared {
    id: SessionId,
    request_id: RequestId,
    context: SessionContext,
    kind: CallKind,
    billing: BillingParams,
    created_at: DateTime<Utc>,
    inner: RwLock<SessionInner>,
    events: SessionEventBus,
}

/// Cheaply clonable handle to one live call session.
#[derive(Debug, Clone)]
pub struct CallSession {
    shared: Arc<SessionShared>,
}

impl CallSession {
    /// Create a session from an accepted request, in `Connecting`.
    ///
    /// Normally done by the orchestrator; the session starts with no media
    /// channel and no timer.
    pub fn new(
        request_id: RequestId,
        context: SessionContext,
        kind: CallKind,
        billing: BillingParams,
        selected_duration_secs: u64,
        events: SessionEventBus,
    ) -> Self {
        let id = SessionId::new();
        tracing::debug!("Created session {} from request {}", id, request_id);
        Self {
            shared: Arc::new(SessionShared {
                id,
                request_id,
                context,
                kind,
                billing,
                created_at: Utc::now(),
                inner: RwLock::new(SessionInner {
                    state: CallState::Connecting,
                    channel: None,
                    timer: None,
                    selected_duration_secs,
                    elapsed_secs: 0,
                    accrued_cost: 0,
                    final_cost: None,
                    connected_at: None,
                    ended_at: None,
                    end_reason: None,
                    overtime_announced: false,
                }),
                events,
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn request_id(&self) -> &RequestId {
        &self.shared.request_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.shared.context
    }

    pub fn kind(&self) -> CallKind {
        self.shared.kind
    }

    pub fn billing(&self) -> &BillingParams {
        &self.shared.billing
    }

    pub fn state(&self) -> CallState {
        self.shared.inner.read().state
    }

    /// Point-in-time public snapshot.
    pub fn snapshot(&self) -> CallSessionInfo {
        let inner = self.shared.inner.read();
        self.snapshot_locked(&inner)
    }

    fn snapshot_locked(&self, inner: &SessionInner) -> CallSessionInfo {
        CallSessionInfo {
            id: self.shared.id.clone(),
            context: self.shared.context.clone(),
            kind: self.shared.kind,
            state: inner.state,
            selected_duration_secs: inner.selected_duration_secs,
            elapsed_secs: inner.elapsed_secs,
            accrued_cost: inner.accrued_cost,
            final_cost: inner.final_cost,
            currency: self.shared.billing.currency.clone(),
            created_at: self.shared.created_at,
            connected_at: inner.connected_at,
            ended_at: inner.ended_at,
            end_reason: inner.end_reason.clone(),
            overtime: inner.elapsed_secs >= inner.selected_duration_secs,
        }
    }

    /// Transition `Connecting -> Connected` once the media channel is live.
    pub fn mark_connected(&self, channel: MediaChannelHandle) -> Result<()> {
        let mut inner = self.shared.inner.write();
        if inner.state != CallState::Connecting {
            return Err(SessionError::invalid_state("mark_connected", inner.state));
        }
        inner.state = CallState::Connected;
        inner.connected_at = Some(Utc::now());
        inner.channel = Some(channel);
        drop(inner);

        tracing::info!("Session {} connected", self.shared.id);
        self.publish_state_change(CallState::Connecting, CallState::Connected);
        Ok(())
    }

    /// Attach the spawned tick timer so it can be stopped on termination.
    pub fn attach_timer(&self, timer: SessionTimer) {
        let mut inner = self.shared.inner.write();
        if inner.state.is_terminal() {
            // Terminal transition won the race; stop the timer right away.
            drop(inner);
            timer.abort();
            return;
        }
        inner.timer = Some(timer);
    }

    /// Apply one timer tick: one second of connected time.
    ///
    /// The only place elapsed time advances. Accrued cost is recomputed
    /// from elapsed time — never incremented — so a duplicated tick path
    /// cannot double-bill.
    pub fn apply_tick(&self) -> TickOutcome {
        let (elapsed, accrued, overtime_entered) = {
            let mut inner = self.shared.inner.write();
            if inner.state != CallState::Connected {
                return TickOutcome::Stopped;
            }
            inner.elapsed_secs += 1;
            inner.accrued_cost = billing::accrued_cost(inner.elapsed_secs, &self.shared.billing);

            let overtime_entered = !inner.overtime_announced
                && inner.elapsed_secs >= inner.selected_duration_secs;
            if overtime_entered {
                inner.overtime_announced = true;
            }
            (inner.elapsed_secs, inner.accrued_cost, overtime_entered)
        };

        self.shared.events.publish(SessionEvent::BillingTick {
            session_id: self.shared.id.clone(),
            elapsed_secs: elapsed,
            accrued_cost: accrued,
        });
        if overtime_entered {
            tracing::info!(
                "Session {} entered overtime at {}s, billing continues",
                self.shared.id,
                elapsed
            );
            self.shared.events.publish(SessionEvent::OvertimeStarted {
                session_id: self.shared.id.clone(),
                elapsed_secs: elapsed,
            });
        }
        TickOutcome::Applied {
            elapsed_secs: elapsed,
            accrued_cost: accrued,
        }
    }

    /// Grow the selected duration of a connected session.
    ///
    /// Only the extension coordinator calls this, and only after payment
    /// confirmation. The timer observes the new duration on its very next
    /// tick; elapsed time and accrued cost are untouched.
    pub fn extend_duration(&self, additional_secs: u64) -> Result<u64> {
        let mut inner = self.shared.inner.write();
        if inner.state != CallState::Connected {
            return Err(SessionError::invalid_state("extend_duration", inner.state));
        }
        inner.selected_duration_secs += additional_secs;
        // Re-arm the overtime notice if the extension pulled the session
        // back under its selected duration.
        if inner.elapsed_secs < inner.selected_duration_secs {
            inner.overtime_announced = false;
        }
        let new_duration = inner.selected_duration_secs;
        drop(inner);

        tracing::info!(
            "Session {} duration extended by {}s to {}s",
            self.shared.id,
            additional_secs,
            new_duration
        );
        Ok(new_duration)
    }

    /// End the session normally. Idempotent: a second call returns the
    /// existing final snapshot without recomputing anything.
    pub fn end(&self, reason: EndReason) -> Termination {
        self.finish(CallState::Ended, reason)
    }

    /// Terminate on media-channel failure. The elapsed time so far is
    /// still billed; partial sessions are never voided.
    pub fn fail(&self, error: ChannelError) -> Termination {
        self.finish(CallState::Error, EndReason::ChannelFailure(error.to_string()))
    }

    fn finish(&self, terminal: CallState, reason: EndReason) -> Termination {
        debug_assert!(terminal.is_terminal());
        let (info, channel, timer, old_state) = {
            let mut inner = self.shared.inner.write();
            if inner.state.is_terminal() {
                return Termination {
                    info: self.snapshot_locked(&inner),
                    channel: None,
                    already_terminal: true,
                };
            }
            let old_state = inner.state;
            inner.state = terminal;
            // Final cost is the last recomputation from elapsed time,
            // written exactly once.
            inner.final_cost = Some(billing::accrued_cost(
                inner.elapsed_secs,
                &self.shared.billing,
            ));
            inner.accrued_cost = inner.final_cost.unwrap_or(0);
            inner.ended_at = Some(Utc::now());
            inner.end_reason = Some(reason.clone());
            let channel = inner.channel.take();
            let timer = inner.timer.take();
            (self.snapshot_locked(&inner), channel, timer, old_state)
        };

        // The status write above already linearizes with ticks (same
        // lock); aborting just stops the idle interval task promptly.
        if let Some(timer) = timer {
            timer.abort();
        }

        tracing::info!(
            "Session {} {} after {}s, final cost {}",
            self.shared.id,
            terminal,
            info.elapsed_secs,
            billing::format_amount(info.final_cost.unwrap_or(0), &info.currency)
        );
        self.publish_state_change(old_state, terminal);
        self.shared.events.publish(SessionEvent::SessionTerminated {
            session_id: self.shared.id.clone(),
            state: terminal,
            elapsed_secs: info.elapsed_secs,
            final_cost: info.final_cost.unwrap_or(0),
            reason,
        });

        Termination {
            info,
            channel,
            already_terminal: false,
        }
    }

    fn publish_state_change(&self, old_state: CallState, new_state: CallState) {
        tracing::debug!(
            "Session {} state: {} -> {}",
            self.shared.id,
            old_state,
            new_state
        );
        self.shared.events.publish(SessionEvent::StateChanged {
            session_id: self.shared.id.clone(),
            old_state,
            new_state,
        });
    }
}
