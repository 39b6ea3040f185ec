//! Provider Presence Tracker
//!
//! A process-lifetime liveness cache, not a system of record. Heartbeats
//! and push updates land in [`PresenceTracker::observe`]; readers get a
//! point-in-time effective status where anything older than the freshness
//! window reads as offline, whatever was stored. Entries age out logically
//! but are never deleted.
//!
//! The data source is decoupled: a polling loop and a push subscription
//! both just call `observe`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use consult_session_core::PartyId;

/// Reported provider availability.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresenceStatus::Online => write!(f, "online"),
            PresenceStatus::Away => write!(f, "away"),
            PresenceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Last known presence of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPresence {
    pub provider_id: PartyId,
    pub status: PresenceStatus,
    pub last_activity_at: DateTime<Utc>,
}

/// In-memory presence store with a staleness window.
pub struct PresenceTracker {
    entries: DashMap<PartyId, ProviderPresence>,
    freshness: Duration,
}

impl PresenceTracker {
    pub fn new(freshness: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            freshness,
        }
    }

    /// Upsert a presence observation, stamping `last_activity_at` to now.
    pub fn observe(&self, provider_id: &PartyId, status: PresenceStatus) {
        self.observe_at(provider_id, status, Utc::now());
    }

    pub(crate) fn observe_at(
        &self,
        provider_id: &PartyId,
        status: PresenceStatus,
        at: DateTime<Utc>,
    ) {
        self.entries
            .entry(provider_id.clone())
            .and_modify(|entry| {
                entry.status = status;
                entry.last_activity_at = at;
            })
            .or_insert_with(|| ProviderPresence {
                provider_id: provider_id.clone(),
                status,
                last_activity_at: at,
            });
        tracing::debug!("Presence for {} observed as {}", provider_id, status);
    }

    /// Last known presence with staleness applied: an entry whose
    /// `last_activity_at` is older than the freshness window is reported
    /// `Offline` regardless of its stored status. `None` means the
    /// provider has never been observed.
    pub fn query(&self, provider_id: &PartyId) -> Option<ProviderPresence> {
        self.query_at(provider_id, Utc::now())
    }

    fn query_at(&self, provider_id: &PartyId, now: DateTime<Utc>) -> Option<ProviderPresence> {
        self.entries.get(provider_id).map(|entry| {
            let mut presence = entry.clone();
            if self.is_stale(&presence, now) {
                presence.status = PresenceStatus::Offline;
            }
            presence
        })
    }

    /// Effective status; never-observed providers are offline.
    pub fn effective_status(&self, provider_id: &PartyId) -> PresenceStatus {
        self.query(provider_id)
            .map(|p| p.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    /// Whether a request may be offered to this provider right now.
    pub fn is_available(&self, provider_id: &PartyId) -> bool {
        self.effective_status(provider_id) == PresenceStatus::Online
    }

    /// Number of providers ever observed.
    pub fn tracked_providers(&self) -> usize {
        self.entries.len()
    }

    fn is_stale(&self, presence: &ProviderPresence, now: DateTime<Utc>) -> bool {
        let window = ChronoDuration::from_std(self.freshness)
            .unwrap_or_else(|_| ChronoDuration::seconds(45));
        now.signed_duration_since(presence.last_activity_at) > window
    }
}
