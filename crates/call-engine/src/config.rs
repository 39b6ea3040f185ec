//! Call Engine Configuration
//!
//! Plain config structs with conservative defaults, sectioned by concern.

use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct CallEngineConfig {
    pub general: GeneralConfig,
    pub persistence: PersistenceConfig,
}

impl Default for CallEngineConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Request, presence, and session timing knobs.
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    /// How long an incoming call request stays acceptable.
    pub request_ttl: Duration,
    /// Presence entries older than this read as offline.
    pub presence_freshness: Duration,
    /// Bound on media-channel establishment; beyond it the session goes
    /// to `Error`.
    pub connect_timeout: Duration,
    /// Billing tick period. One second in production; tests may shrink it.
    pub tick_interval: Duration,
    /// Period of the background expired-request sweep.
    pub sweep_interval: Duration,
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(60),
            presence_freshness: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(15),
            tick_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// Finalized-record persistence retry policy.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Retries after the initial attempt before escalating for manual
    /// reconciliation.
    pub max_retries: u32,
    /// Base backoff between retries; grows linearly per attempt.
    pub retry_backoff: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}
