//! Integration tests for the call engine
//!
//! These drive the full engine — presence gating, request lifecycle,
//! session billing, extensions, finalization — against mock media and
//! payment collaborators and the in-memory record store. Timer-driven
//! scenarios run on tokio's paused clock so simulated call time is exact.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serial_test::serial;
use tokio::sync::mpsc;

use consult_call_engine::prelude::*;
use consult_call_engine::database::MemoryRecordStore;

const PAYMENT_SECRET: &[u8] = b"integration-test-secret";

/// Opt-in test logging: `RUST_LOG=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock media provider: hands out channels backed by an mpsc event pipe
/// and counts open/close calls so release-exactly-once is observable.
struct MockMedia {
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_next_open: AtomicBool,
    disconnect_tx: Mutex<Option<mpsc::Sender<MediaChannelEvent>>>,
}

impl MockMedia {
    fn new() -> Self {
        Self {
            open_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            fail_next_open: AtomicBool::new(false),
            disconnect_tx: Mutex::new(None),
        }
    }

    async fn disconnect(&self, reason: &str) {
        let tx = self
            .disconnect_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no open channel to disconnect");
        tx.send(MediaChannelEvent::Disconnected {
            reason: reason.into(),
        })
        .await
        .unwrap();
    }
}

#[async_trait]
impl MediaChannelProvider for MockMedia {
    async fn open(&self, channel_name: &str, _kind: CallKind) -> Result<MediaChannel, ChannelError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_open.load(Ordering::SeqCst) {
            return Err(ChannelError::SetupFailed("mock setup failure".into()));
        }
        let (tx, rx) = mpsc::channel(4);
        *self.disconnect_tx.lock().unwrap() = Some(tx);
        Ok(MediaChannel {
            handle: MediaChannelHandle(channel_name.to_string()),
            events: rx,
        })
    }

    async fn close(&self, _handle: MediaChannelHandle) -> Result<(), ChannelError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestHarness {
    engine: Arc<CallEngine>,
    media: Arc<MockMedia>,
    store: Arc<MemoryRecordStore>,
    context: SessionContext,
}

fn create_test_engine(config: CallEngineConfig) -> TestHarness {
    init_tracing();
    let media = Arc::new(MockMedia::new());
    let store = Arc::new(MemoryRecordStore::new());
    let engine = CallEngine::new(
        config,
        media.clone(),
        Arc::new(SignatureVerifier::new(PAYMENT_SECRET.to_vec())),
        store.clone(),
    );
    let context = SessionContext::new(PartyId::new("user-42"), PartyId::new("provider-7"));
    engine
        .presence()
        .observe(&context.provider, PresenceStatus::Online);
    TestHarness {
        engine,
        media,
        store,
        context,
    }
}

fn default_harness() -> TestHarness {
    create_test_engine(CallEngineConfig::default())
}

/// Accept a fresh request and return the connected session.
async fn connected_session(harness: &TestHarness, billing: BillingParams, duration: u64) -> CallSession {
    let request = harness
        .engine
        .request_call(harness.context.clone(), CallKind::Video, billing, duration)
        .expect("provider is online");
    let session = harness
        .engine
        .accept_request(&request.id)
        .await
        .expect("accept should succeed");
    assert_eq!(session.state(), CallState::Connected);
    // Let the spawned timer task establish its interval.
    tokio::task::yield_now().await;
    session
}

async fn advance_secs(n: u64) {
    for _ in 0..n {
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
    }
}

/// Poll until the session reaches a terminal state without touching the
/// clock (the channel monitor runs on its own task).
async fn wait_terminal(session: &CallSession) {
    for _ in 0..100 {
        if session.state().is_terminal() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("session never reached a terminal state");
}

fn proof_for(extension: &ExtensionRequest, payment_id: &str) -> PaymentProof {
    let signer = SignatureVerifier::new(PAYMENT_SECRET.to_vec());
    PaymentProof {
        order_id: extension.order_id.clone(),
        payment_id: payment_id.into(),
        signature: signer.sign(&extension.order_id, payment_id),
        amount: extension.cost,
    }
}

#[tokio::test]
async fn requests_are_gated_on_provider_presence() {
    let harness = default_harness();
    let away_provider = PartyId::new("provider-away");
    harness
        .engine
        .presence()
        .observe(&away_provider, PresenceStatus::Away);

    let context = SessionContext::new(PartyId::new("user-42"), away_provider);
    let err = harness
        .engine
        .request_call(context, CallKind::Audio, BillingParams::new(1000, "INR", 15), 900)
        .unwrap_err();
    assert!(matches!(err, PresenceError::ProviderUnavailable { .. }));

    // The online provider can be offered a request.
    assert!(harness
        .engine
        .request_call(
            harness.context.clone(),
            CallKind::Audio,
            BillingParams::new(1000, "INR", 15),
            900
        )
        .is_ok());
}

#[tokio::test]
async fn an_expired_request_never_creates_a_session() {
    let mut config = CallEngineConfig::default();
    config.general.request_ttl = Duration::ZERO;
    let harness = create_test_engine(config);

    let request = harness
        .engine
        .request_call(
            harness.context.clone(),
            CallKind::Video,
            BillingParams::new(1000, "INR", 15),
            900,
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(5));
    let err = harness.engine.accept_request(&request.id).await.unwrap_err();
    assert!(matches!(
        err,
        CallEngineError::Request(RequestError::Expired(_))
    ));
    assert_eq!(harness.engine.get_stats().total_sessions, 0);
    assert_eq!(
        harness.engine.get_request(&request.id).unwrap().status,
        RequestStatus::Expired
    );
}

#[tokio::test(start_paused = true)]
async fn a_full_lifecycle_bills_and_persists_once() {
    let harness = default_harness();
    // 10.00/min with 15 free minutes, 15 minutes selected.
    let session =
        connected_session(&harness, BillingParams::new(1000, "INR", 15), 900).await;

    // 20 minutes on the clock: 5 billable minutes.
    advance_secs(1200).await;
    let info = session.snapshot();
    assert_eq!(info.elapsed_secs, 1200);
    assert_eq!(info.accrued_cost, 5000);
    assert!(info.overtime);

    let ended = harness
        .engine
        .end_session(session.id(), EndReason::Hangup)
        .await
        .unwrap();
    assert_eq!(ended.state, CallState::Ended);
    assert_eq!(ended.final_cost, Some(5000));
    assert_eq!(harness.media.close_calls.load(Ordering::SeqCst), 1);

    let record = harness
        .store
        .get_session_record(session.id())
        .await
        .unwrap()
        .expect("record persisted");
    assert_eq!(record.final_cost, 5000);
    assert_eq!(record.state, CallState::Ended);
    assert_eq!(record.elapsed_secs, 1200);

    // Ending again is a no-op: same snapshot, no second release, no
    // second record.
    let again = harness
        .engine
        .end_session(session.id(), EndReason::Hangup)
        .await
        .unwrap();
    assert_eq!(again.final_cost, Some(5000));
    assert_eq!(again.ended_at, ended.ended_at);
    assert_eq!(harness.media.close_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn a_mid_call_disconnect_bills_partial_time() {
    let harness = default_harness();
    // 900s selected; the drop lands at 905s, already in overtime.
    let session = connected_session(&harness, BillingParams::new(1000, "INR", 0), 900).await;

    advance_secs(905).await;
    harness.media.disconnect("network drop").await;
    wait_terminal(&session).await;

    let info = session.snapshot();
    assert_eq!(info.state, CallState::Error);
    assert_eq!(info.elapsed_secs, 905);
    assert!(info.overtime);
    // ceil(905/60) = 16 billable minutes — partial sessions are billed,
    // not voided.
    assert_eq!(info.final_cost, Some(16_000));

    let record = harness
        .store
        .get_session_record(session.id())
        .await
        .unwrap()
        .expect("error sessions are persisted too");
    assert_eq!(record.state, CallState::Error);
    assert_eq!(record.final_cost, 16_000);
    assert_eq!(harness.media.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn channel_setup_failure_surfaces_as_error_state() {
    let harness = default_harness();
    harness.media.fail_next_open.store(true, Ordering::SeqCst);

    let request = harness
        .engine
        .request_call(
            harness.context.clone(),
            CallKind::Video,
            BillingParams::new(1000, "INR", 15),
            900,
        )
        .unwrap();
    let session = harness.engine.accept_request(&request.id).await.unwrap();

    assert_eq!(session.state(), CallState::Error);
    let info = session.snapshot();
    assert_eq!(info.final_cost, Some(0));
    assert!(matches!(info.end_reason, Some(EndReason::ChannelFailure(_))));

    // Nothing was opened, so nothing is released.
    assert_eq!(harness.media.close_calls.load(Ordering::SeqCst), 0);
    // The failure is still finalized and persisted.
    assert!(harness
        .store
        .get_session_record(session.id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn extensions_apply_only_after_verified_payment() {
    let harness = default_harness();
    let session = connected_session(&harness, BillingParams::new(1000, "INR", 0), 900).await;
    advance_secs(60).await;

    // 10 minutes at 10.00/min: 100.00, no free-minutes discount.
    let extension = harness.engine.request_extension(session.id(), 10).unwrap();
    assert_eq!(extension.cost, 10_000);

    // Only one outstanding extension per session.
    assert!(matches!(
        harness.engine.request_extension(session.id(), 5).unwrap_err(),
        CallEngineError::Extension(ExtensionError::ExtensionInProgress(_))
    ));

    // A bad signature leaves the session untouched and is retryable.
    let mut bad = proof_for(&extension, "pay-1");
    bad.signature = "deadbeef".into();
    let err = harness
        .engine
        .confirm_extension_payment(session.id(), bad)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallEngineError::Payment(PaymentError::SignatureMismatch)
    ));
    assert_eq!(session.snapshot().selected_duration_secs, 900);

    // Applying before confirmation is refused.
    assert!(matches!(
        harness.engine.apply_extension(session.id()).unwrap_err(),
        CallEngineError::Extension(ExtensionError::NotConfirmed(_))
    ));

    // Billing kept running at the original parameters during the payment
    // exchange.
    advance_secs(30).await;
    assert_eq!(session.snapshot().elapsed_secs, 90);

    let confirmed = harness
        .engine
        .confirm_extension_payment(session.id(), proof_for(&extension, "pay-1"))
        .await
        .unwrap();
    assert!(confirmed.confirmed);

    let info = harness.engine.apply_extension(session.id()).unwrap();
    assert_eq!(info.selected_duration_secs, 900 + 600);

    // The live timer observes the new duration on its next tick; no
    // billing gap, no double-counted time.
    advance_secs(810).await;
    let info = session.snapshot();
    assert_eq!(info.elapsed_secs, 900);
    assert!(!info.overtime);
}

#[tokio::test]
async fn declines_and_sweeps_are_surfaced_to_observers() {
    let mut config = CallEngineConfig::default();
    config.general.request_ttl = Duration::ZERO;
    let harness = create_test_engine(config);
    let mut events = harness.engine.subscribe();

    let request = harness
        .engine
        .request_call(
            harness.context.clone(),
            CallKind::Audio,
            BillingParams::new(1000, "INR", 15),
            900,
        )
        .unwrap();

    std::thread::sleep(Duration::from_millis(5));
    let expired = harness.engine.sweep_expired_requests();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, request.id);

    let mut saw_incoming = false;
    let mut saw_expired = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::IncomingRequest { request_id, .. } => {
                saw_incoming = request_id == request.id;
            }
            SessionEvent::RequestExpired { request_id } => {
                saw_expired = request_id == request.id;
            }
            _ => {}
        }
    }
    assert!(saw_incoming, "IncomingRequest event not observed");
    assert!(saw_expired, "RequestExpired event not observed");
}

#[tokio::test(start_paused = true)]
#[serial]
async fn the_sqlite_store_records_the_outcome() -> anyhow::Result<()> {
    init_tracing();
    // Keep one task perpetually ready so tokio never *auto*-advances this
    // test's from-start paused clock. Without it, sqlx's real-clock pool I/O
    // (connect and every query) parks the runtime, which then jumps the
    // virtual clock to the pool's acquire timeout and fails. The billing
    // below is driven by explicit `tokio::time::advance`, so holding the
    // clock otherwise still makes the elapsed math exact. Aborted on the way
    // out.
    let keepalive = tokio::spawn(async {
        loop {
            tokio::task::yield_now().await;
        }
    });

    let media = Arc::new(MockMedia::new());
    let store = Arc::new(SqliteRecordStore::new("sqlite::memory:").await?);
    let engine = CallEngine::new(
        CallEngineConfig::default(),
        media.clone(),
        Arc::new(SignatureVerifier::new(PAYMENT_SECRET.to_vec())),
        store.clone(),
    );
    let context = SessionContext::new(PartyId::new("user-42"), PartyId::new("provider-7"));
    engine
        .presence()
        .observe(&context.provider, PresenceStatus::Online);

    let request = engine
        .request_call(context, CallKind::Audio, BillingParams::new(500, "INR", 0), 600)
        .map_err(anyhow::Error::from)?;
    let session = engine.accept_request(&request.id).await?;
    tokio::task::yield_now().await;

    advance_secs(61).await;
    let ended = engine.end_session(session.id(), EndReason::Hangup).await?;
    assert_eq!(ended.final_cost, Some(1000));

    let record = store
        .get_session_record(session.id())
        .await?
        .expect("record persisted to sqlite");
    assert_eq!(record.final_cost, 1000);
    assert_eq!(record.request_id, request.id);
    assert_eq!(record.state, CallState::Ended);
    keepalive.abort();
    Ok(())
}
