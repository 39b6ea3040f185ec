//! Session Tick Timer
//!
//! One timer task per session, producing one tick per second into
//! [`CallSession::apply_tick`]. The timer carries no business logic: it is
//! a scheduler adapter, which keeps billing fully testable by calling
//! `apply_tick` directly.

use std::time::Duration;
use tokio::task::JoinHandle;

use crate::session::session::{CallSession, TickOutcome};

/// Handle to the spawned tick loop of one session.
#[derive(Debug)]
pub struct SessionTimer {
    handle: JoinHandle<()>,
}

impl SessionTimer {
    /// Spawn the tick loop. The loop exits on its own once the session
    /// leaves `Connected`; terminal transitions also abort it so the task
    /// does not linger for a final idle interval.
    pub fn spawn(session: CallSession, tick_interval: Duration) -> Self {
        let session_id = session.id().clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            // The first interval tick completes immediately; consume it so
            // the first elapsed second lands one full interval after
            // connect.
            interval.tick().await;
            loop {
                interval.tick().await;
                match session.apply_tick() {
                    TickOutcome::Applied { .. } => {}
                    TickOutcome::Stopped => break,
                }
            }
            tracing::debug!("Timer for session {} stopped", session.id());
        });
        tracing::debug!("Timer for session {} started", session_id);
        Self { handle }
    }

    /// Stop the tick loop. Safe to call after the loop already exited.
    pub fn abort(&self) {
        self.handle.abort();
    }
}
