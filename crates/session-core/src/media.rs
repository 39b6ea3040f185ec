//! Media Channel Port
//!
//! The engine never speaks a media protocol itself. It opens and closes
//! opaque channels through [`MediaChannelProvider`] and observes
//! asynchronous channel failure through the event receiver returned by
//! `open`. Concrete transports (WebRTC, SFU, SIP media) live behind this
//! trait in adapter crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::CallKind;

/// Errors raised by the media channel provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel could not be established.
    #[error("media channel setup failed: {0}")]
    SetupFailed(String),

    /// Channel establishment did not complete within the design timeout.
    #[error("media channel setup timed out")]
    Timeout,

    /// A live channel dropped (network loss, remote teardown).
    #[error("media channel disconnected: {0}")]
    Disconnected(String),
}

/// Opaque handle to an open media channel.
///
/// Exclusively owned by one session for its lifetime and released exactly
/// once on termination.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct MediaChannelHandle(pub String);

impl std::fmt::Display for MediaChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asynchronous events reported by an open channel.
#[derive(Debug, Clone)]
pub enum MediaChannelEvent {
    /// The channel dropped. The orchestrator turns this into a session
    /// `Error` transition; partial cost is still computed.
    Disconnected { reason: String },
}

/// A freshly opened channel: the handle plus the stream of asynchronous
/// events for it.
#[derive(Debug)]
pub struct MediaChannel {
    pub handle: MediaChannelHandle,
    pub events: mpsc::Receiver<MediaChannelEvent>,
}

/// Port to the external media/signaling collaborator.
#[async_trait]
pub trait MediaChannelProvider: Send + Sync {
    /// Open a channel for the given call. May fail synchronously; callers
    /// bound the wait with their own timeout.
    async fn open(&self, channel_name: &str, kind: CallKind) -> Result<MediaChannel, ChannelError>;

    /// Release a channel. Must tolerate being called for a channel that
    /// already went away remotely.
    async fn close(&self, handle: MediaChannelHandle) -> Result<(), ChannelError>;
}
