//! Finalize-Record Persistence with Retry
//!
//! The call experience never blocks on the record write: the first
//! attempt happens inline during finalization, and failures are retried
//! here in the background with growing backoff. After the retry budget is
//! spent the record is escalated to the log for manual reconciliation —
//! never dropped silently. The in-memory terminal snapshot stays
//! authoritative until a write lands.

use std::sync::Arc;

use crate::config::PersistenceConfig;
use crate::database::SessionRecordStore;
use crate::orchestrator::types::SessionRecord;

/// Write `record` once, retrying in a spawned task on failure.
pub(crate) fn persist_finalized(
    store: Arc<dyn SessionRecordStore>,
    record: SessionRecord,
    config: PersistenceConfig,
) {
    tokio::spawn(async move {
        persist_with_retry(store, record, config).await;
    });
}

pub(crate) async fn persist_with_retry(
    store: Arc<dyn SessionRecordStore>,
    record: SessionRecord,
    config: PersistenceConfig,
) {
    let session_id = record.session_id.clone();
    let mut attempt: u32 = 0;
    loop {
        match store.upsert_session_record(&record).await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(
                        "Record for session {} persisted after {} retries",
                        session_id,
                        attempt
                    );
                }
                return;
            }
            Err(err) if attempt < config.max_retries => {
                attempt += 1;
                let backoff = config.retry_backoff * attempt;
                tracing::warn!(
                    "Persisting record for session {} failed (attempt {}/{}): {}; retrying in {:?}",
                    session_id,
                    attempt,
                    config.max_retries,
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                tracing::error!(
                    "Record for session {} could not be persisted after {} retries: {}; \
                     escalating for manual reconciliation: {:?}",
                    session_id,
                    config.max_retries,
                    err,
                    record
                );
                return;
            }
        }
    }
}
