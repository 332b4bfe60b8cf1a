use async_trait::async_trait;
use protocol::{HistoryEntry, UrgencyLevel};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use triage_core::mocks::ScriptedBackend;
use triage_core::{
    BackendError, ChatReply, ControllerConfig, MemoryKeyValueStore, MessageStore, Outcome, SessionGreeting,
    SessionStatus, TriageBackend, TriageError, TriageRequest, TriageResult, TriageSessionController,
};

/// Holds the next chat call until the test releases it.
struct GatedBackend {
    inner: ScriptedBackend,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    entered: Notify,
}

impl GatedBackend {
    fn new(inner: ScriptedBackend, gate: oneshot::Receiver<()>) -> Self {
        Self { inner, gate: Mutex::new(Some(gate)), entered: Notify::new() }
    }
}

#[async_trait]
impl TriageBackend for GatedBackend {
    async fn start_session(&self) -> Result<SessionGreeting, BackendError> {
        self.inner.start_session().await
    }

    async fn send_message(&self, session_id: &str, message: &str, history: &[HistoryEntry]) -> Result<ChatReply, BackendError> {
        let gate = self.gate.lock().unwrap().take();
        self.entered.notify_one();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.send_message(session_id, message, history).await
    }

    async fn fetch_triage(&self, session_id: &str) -> Result<TriageResult, BackendError> {
        self.inner.fetch_triage(session_id).await
    }
}

/// Holds the first triage fetch until the test releases it.
struct GatedTriageBackend {
    inner: ScriptedBackend,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    entered: Notify,
}

#[async_trait]
impl TriageBackend for GatedTriageBackend {
    async fn start_session(&self) -> Result<SessionGreeting, BackendError> {
        self.inner.start_session().await
    }

    async fn send_message(&self, session_id: &str, message: &str, history: &[HistoryEntry]) -> Result<ChatReply, BackendError> {
        self.inner.send_message(session_id, message, history).await
    }

    async fn fetch_triage(&self, session_id: &str) -> Result<TriageResult, BackendError> {
        let gate = self.gate.lock().unwrap().take();
        self.entered.notify_one();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.fetch_triage(session_id).await
    }
}

/// Chat calls never complete.
struct HangingBackend {
    entered: Notify,
}

#[async_trait]
impl TriageBackend for HangingBackend {
    async fn start_session(&self) -> Result<SessionGreeting, BackendError> {
        Ok(SessionGreeting { session_id: "s1".into(), greeting: "Hello".into() })
    }

    async fn send_message(&self, _session_id: &str, _message: &str, _history: &[HistoryEntry]) -> Result<ChatReply, BackendError> {
        self.entered.notify_one();
        std::future::pending().await
    }

    async fn fetch_triage(&self, _session_id: &str) -> Result<TriageResult, BackendError> {
        std::future::pending().await
    }
}

fn with_timeout<B: TriageBackend>(backend: B, timeout: Duration) -> TriageSessionController<B> {
    let store = MessageStore::open(MemoryKeyValueStore::new()).unwrap();
    TriageSessionController::new(backend, store, ControllerConfig { request_timeout: timeout })
}

#[tokio::test]
async fn test_session_switch_discards_stale_response() {
    let (release, gate) = oneshot::channel();
    let scripted = ScriptedBackend::new()
        .with_session("s1", "Hello")
        .with_session("s2", "Hello again")
        .with_reply("reply meant for s1", false);
    let backend = Arc::new(GatedBackend::new(scripted, gate));
    let controller = Arc::new(TriageSessionController::in_memory(backend.clone()));
    controller.start_session().await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send_message("I feel dizzy").await })
    };
    backend.entered.notified().await;

    controller.clear_session();
    assert!(controller.start_session().await.is_applied());
    assert_eq!(controller.session_id().as_deref(), Some("s2"));

    release.send(()).unwrap();
    assert_eq!(pending.await.unwrap(), Outcome::Discarded);

    assert_eq!(controller.numbered_transcript(), vec!["1: [bot] Hello again"]);
    assert_eq!(controller.status(), SessionStatus::Active);
    assert!(!controller.snapshot().in_flight);
}

#[tokio::test]
async fn test_operations_are_busy_while_a_call_is_in_flight() {
    let (release, gate) = oneshot::channel();
    let scripted = ScriptedBackend::new().with_session("s1", "Hello").with_reply("How long?", false);
    let backend = Arc::new(GatedBackend::new(scripted, gate));
    let controller = Arc::new(TriageSessionController::in_memory(backend.clone()));
    controller.start_session().await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send_message("headache").await })
    };
    backend.entered.notified().await;

    assert!(controller.snapshot().in_flight);
    assert_eq!(controller.send_message("again").await, Outcome::Busy);
    assert_eq!(controller.start_session().await, Outcome::Busy);
    assert_eq!(controller.fetch_triage_result().await, Outcome::Busy);
    assert_eq!(controller.restore(), Outcome::Busy);

    release.send(()).unwrap();
    assert!(pending.await.unwrap().is_applied());
    assert_eq!(controller.messages().len(), 3);
}

#[tokio::test]
async fn test_hung_request_times_out() {
    let backend = HangingBackend { entered: Notify::new() };
    let controller = with_timeout(backend, Duration::from_millis(50));
    controller.start_session().await;

    let outcome = controller.send_message("shortness of breath").await;
    assert!(matches!(outcome, Outcome::Failed(TriageError::Backend(BackendError::Timeout(_)))));
    assert_eq!(controller.status(), SessionStatus::Active);
    assert!(!controller.snapshot().in_flight);
    assert_eq!(controller.messages().len(), 2);
}

#[tokio::test]
async fn test_cancelled_call_releases_the_controller() {
    let backend = Arc::new(HangingBackend { entered: Notify::new() });
    let controller = Arc::new(with_timeout(backend.clone(), Duration::from_secs(60)));
    controller.start_session().await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send_message("back pain").await })
    };
    backend.entered.notified().await;
    assert!(controller.snapshot().in_flight);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert!(!controller.snapshot().in_flight);
    assert_eq!(controller.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_enough_info_fetches_once_while_the_fetch_is_pending() {
    let (release, gate) = oneshot::channel();
    let scripted = ScriptedBackend::new()
        .with_session("s1", "Hello")
        .with_reply("I have enough information.", true)
        .with_reply("Still enough.", true)
        .with_triage("s1", UrgencyLevel::Urgent, vec![]);
    let backend = Arc::new(GatedTriageBackend {
        inner: scripted,
        gate: Mutex::new(Some(gate)),
        entered: Notify::new(),
    });
    let controller = Arc::new(TriageSessionController::in_memory(backend.clone()));
    controller.start_session().await;

    let pending = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.send_message("fever and chills").await })
    };
    backend.entered.notified().await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.status, SessionStatus::AwaitingTriage);
    assert_eq!(snapshot.triage_request, TriageRequest::InFlight);
    assert_eq!(controller.send_message("since yesterday").await, Outcome::Busy);
    assert_eq!(controller.fetch_triage_result().await, Outcome::Busy);
    assert_eq!(controller.retry_last_message().await, Outcome::Busy);

    release.send(()).unwrap();
    assert_eq!(
        pending.await.unwrap(),
        Outcome::Applied { from: SessionStatus::Active, to: SessionStatus::Complete }
    );
    assert_eq!(controller.snapshot().triage_request, TriageRequest::Done);
    assert_eq!(
        controller.send_message("since yesterday").await,
        Outcome::InvalidState { status: SessionStatus::Complete, operation: "send_message" }
    );
    assert_eq!(backend.inner.fetch_triage_calls(), 1);
    // the rejected turns never reached the backend
    assert_eq!(controller.messages().len(), 3);
}
