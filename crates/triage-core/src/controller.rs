//! The triage session controller: owns one conversation at a time and drives
//! it from greeting to triage result.
//!
//! Locks are never held across an `.await`. Lock order is `state` then
//! `store`.

use serde::{Serialize, Serializer};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BackendError, StoreError, TriageError};
use crate::ports::backend::{HealthStatus, TriageBackend, TriageResult};
use crate::ports::storage::{KeyValueStore, MemoryKeyValueStore};
use crate::session::{to_backend_history, to_numbered_transcript, Message, Role, SessionStateMachine, SessionStatus, TriageRequest};
use crate::store::{MessageStore, SessionStats, StoreStats};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Upper bound for every backend call.
    pub request_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyMessage,
    NothingToRetry,
    NothingToRestore,
}

/// Result of a controller operation
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation ran; `to` is the status it left behind
    Applied { from: SessionStatus, to: SessionStatus },

    /// Nothing to do (not an error)
    Ignored(IgnoreReason),

    /// Another operation is still waiting on the backend
    Busy,

    /// Operation not valid from the current status
    InvalidState { status: SessionStatus, operation: &'static str },

    /// Backend or transition failure, also recorded as `last_error`
    Failed(TriageError),

    /// The response arrived after the session was cleared or replaced
    Discarded,
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

/// Point-in-time view of the controller for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub has_enough_info: bool,
    pub triage_request: TriageRequest,
    pub triage_result: Option<TriageResult>,
    #[serde(serialize_with = "display_opt")]
    pub last_error: Option<TriageError>,
    pub last_warning: Option<String>,
    pub in_flight: bool,
    pub messages: Vec<Message>,
}

fn display_opt<S: Serializer>(value: &Option<TriageError>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

struct ControllerState {
    machine: SessionStateMachine,
    session_id: Option<String>,
    /// Bumped whenever the current session is cleared or replaced.
    generation: u64,
    in_flight: bool,
    triage_result: Option<TriageResult>,
    last_error: Option<TriageError>,
    last_warning: Option<String>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            machine: SessionStateMachine::new(),
            session_id: None,
            generation: 0,
            in_flight: false,
            triage_result: None,
            last_error: None,
            last_warning: None,
        }
    }

    fn status(&self) -> SessionStatus {
        self.machine.current_state()
    }

    /// Record the outcome of a store mutation. The warning stays until a
    /// later write leaves nothing pending.
    fn note_store<T, K: KeyValueStore>(&mut self, store: &MessageStore<K>, result: Result<T, StoreError>) {
        match result {
            Err(e) => {
                warn!(error = %e, "persistence failed; continuing with in-memory history");
                self.last_warning = Some(e.to_string());
            }
            Ok(_) if self.last_warning.is_some() && !store.has_pending_writes() => {
                debug!("pending writes persisted");
                self.last_warning = None;
            }
            Ok(_) => {}
        }
    }

    fn record_error(&mut self, error: TriageError) -> Outcome {
        warn!(error = %error, status = %self.status(), "triage operation failed");
        self.last_error = Some(error.clone());
        Outcome::Failed(error)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies which session/generation a backend call was issued for.
#[derive(Debug, Clone)]
struct Ticket {
    session_id: Option<String>,
    generation: u64,
}

impl Ticket {
    fn is_current(&self, state: &ControllerState) -> bool {
        state.generation == self.generation && state.session_id == self.session_id
    }
}

/// Releases the in-flight flag if an operation's future is dropped before it
/// completes, so a cancelled caller cannot wedge the controller.
struct FlightGuard<'a> {
    state: &'a Mutex<ControllerState>,
    generation: u64,
    armed: bool,
}

impl<'a> FlightGuard<'a> {
    fn new(state: &'a Mutex<ControllerState>, generation: u64) -> Self {
        Self { state, generation, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = lock(self.state);
        if st.generation == self.generation && st.in_flight {
            debug!("operation cancelled; releasing in-flight flag");
            st.in_flight = false;
            if st.status() == SessionStatus::AwaitingTriage {
                let _ = st.machine.triage_failed();
            }
        }
    }
}

pub struct TriageSessionController<B: TriageBackend, K: KeyValueStore = MemoryKeyValueStore> {
    backend: B,
    store: Mutex<MessageStore<K>>,
    state: Mutex<ControllerState>,
    config: ControllerConfig,
}

impl<B: TriageBackend> TriageSessionController<B, MemoryKeyValueStore> {
    /// Controller with an ephemeral store (tests, demos).
    pub fn in_memory(backend: B) -> Self {
        Self::new(backend, MessageStore::empty(MemoryKeyValueStore::new()), ControllerConfig::default())
    }
}

impl<B: TriageBackend, K: KeyValueStore> TriageSessionController<B, K> {
    pub fn new(backend: B, store: MessageStore<K>, config: ControllerConfig) -> Self {
        Self {
            backend,
            store: Mutex::new(store),
            state: Mutex::new(ControllerState::new()),
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.config.request_timeout)),
        }
    }

    /// Ask the backend for a new session and record its greeting as message #1.
    /// Any current session is superseded (cleared) first.
    pub async fn start_session(&self) -> Outcome {
        let (ticket, superseded) = {
            let mut st = lock(&self.state);
            if st.in_flight {
                return Outcome::Busy;
            }
            let superseded = st.session_id.take();
            if superseded.is_some() {
                st.machine.reset();
                st.triage_result = None;
            }
            st.generation += 1;
            st.in_flight = true;
            st.last_error = None;
            (Ticket { session_id: None, generation: st.generation }, superseded)
        };
        let mut guard = FlightGuard::new(&self.state, ticket.generation);

        if let Some(old) = superseded {
            info!(session_id = %old, "superseding current session");
            let mut st = lock(&self.state);
            let mut store = lock(&self.store);
            let r = store.clear_session(&old);
            st.note_store(&*store, r);
        }

        let result = self.call(self.backend.start_session()).await;

        let mut st = lock(&self.state);
        if !ticket.is_current(&st) {
            debug!("start-session response discarded");
            guard.disarm();
            return Outcome::Discarded;
        }
        st.in_flight = false;
        guard.disarm();

        let from = st.status();
        match result {
            Ok(greeting) => {
                if let Err(e) = st.machine.start() {
                    return st.record_error(e.into());
                }
                let session_id = greeting.session_id;
                st.session_id = Some(session_id.clone());
                {
                    let mut store = lock(&self.store);
                    if store.stats(&session_id).count > 0 {
                        // numbering restarts at 1 for every session we begin
                        let r = store.clear_session(&session_id);
                        st.note_store(&*store, r);
                    }
                    let r = store.begin_session(&session_id);
                    st.note_store(&*store, r);
                    let r = store.append(&session_id, Role::Assistant, &greeting.greeting);
                    st.note_store(&*store, r);
                }
                info!(session_id = %session_id, "triage session started");
                Outcome::Applied { from, to: st.status() }
            }
            Err(e) => {
                let _ = st.machine.fail(e.is_recoverable());
                st.record_error(e.into())
            }
        }
    }

    /// Send one user turn. Blank input is ignored. The user message is stored
    /// before the backend is called and is kept even if the call fails.
    pub async fn send_message(&self, text: &str) -> Outcome {
        let text = text.trim();
        if text.is_empty() {
            return Outcome::Ignored(IgnoreReason::EmptyMessage);
        }

        let (ticket, session_id, history) = {
            let mut st = lock(&self.state);
            let status = st.status();
            let Some(session_id) = st.session_id.clone() else {
                return Outcome::InvalidState { status, operation: "send_message" };
            };
            if st.in_flight {
                return Outcome::Busy;
            }
            if status != SessionStatus::Active {
                return Outcome::InvalidState { status, operation: "send_message" };
            }
            st.in_flight = true;
            st.last_error = None;

            let mut store = lock(&self.store);
            let r = store.append(&session_id, Role::User, text);
            st.note_store(&*store, r);
            // always re-derived from the store, never cached
            let history = to_backend_history(&store.session_messages(&session_id));
            let ticket = Ticket { session_id: Some(session_id.clone()), generation: st.generation };
            (ticket, session_id, history)
        };
        let mut guard = FlightGuard::new(&self.state, ticket.generation);

        debug!(session_id = %session_id, history_len = history.len(), "sending message");
        let result = self.call(self.backend.send_message(&session_id, text, &history)).await;

        let from = {
            let mut st = lock(&self.state);
            if !ticket.is_current(&st) {
                debug!(session_id = %session_id, "chat response discarded; session changed");
                guard.disarm();
                return Outcome::Discarded;
            }
            let reply = match result {
                Ok(reply) => reply,
                Err(e) => {
                    st.in_flight = false;
                    guard.disarm();
                    return st.record_error(e.into());
                }
            };

            let from = st.status();
            {
                let mut store = lock(&self.store);
                let r = store.append(&session_id, Role::Assistant, &reply.reply);
                st.note_store(&*store, r);
            }

            let enough = reply.has_enough_info || reply.triage_complete;
            if !st.machine.record_reply(enough) {
                st.in_flight = false;
                guard.disarm();
                return Outcome::Applied { from, to: st.status() };
            }
            info!(session_id = %session_id, "enough information collected; fetching triage result");
            from
        };

        self.run_triage_fetch(ticket, session_id, from, guard).await
    }

    /// Re-send the most recent user message. The message is appended again;
    /// duplicates are intentional.
    pub async fn retry_last_message(&self) -> Outcome {
        let last = {
            let st = lock(&self.state);
            let Some(session_id) = st.session_id.clone() else {
                return Outcome::InvalidState { status: st.status(), operation: "retry_last_message" };
            };
            let store = lock(&self.store);
            store.last_user_message(&session_id)
        };
        match last {
            Some(message) => self.send_message(&message.content).await,
            None => Outcome::Ignored(IgnoreReason::NothingToRetry),
        }
    }

    /// Explicitly request the triage result (e.g. after a failed automatic fetch).
    pub async fn fetch_triage_result(&self) -> Outcome {
        let (ticket, session_id, from) = {
            let mut st = lock(&self.state);
            let status = st.status();
            let Some(session_id) = st.session_id.clone() else {
                return Outcome::InvalidState { status, operation: "fetch_triage_result" };
            };
            if st.in_flight {
                return Outcome::Busy;
            }
            if st.machine.begin_triage().is_err() {
                return Outcome::InvalidState { status, operation: "fetch_triage_result" };
            }
            st.in_flight = true;
            st.last_error = None;
            (Ticket { session_id: Some(session_id.clone()), generation: st.generation }, session_id, status)
        };
        let guard = FlightGuard::new(&self.state, ticket.generation);
        self.run_triage_fetch(ticket, session_id, from, guard).await
    }

    async fn run_triage_fetch(&self, ticket: Ticket, session_id: String, from: SessionStatus, mut guard: FlightGuard<'_>) -> Outcome {
        let result = self.call(self.backend.fetch_triage(&session_id)).await;

        let mut st = lock(&self.state);
        guard.disarm();
        if !ticket.is_current(&st) {
            debug!(session_id = %session_id, "triage response discarded; session changed");
            return Outcome::Discarded;
        }
        st.in_flight = false;

        match result {
            Ok(result) => {
                if let Err(e) = st.machine.triage_succeeded() {
                    return st.record_error(e.into());
                }
                info!(session_id = %session_id, urgency = %result.urgency, symptoms = result.symptoms.len(), "triage complete");
                st.triage_result = Some(result);
                Outcome::Applied { from, to: st.status() }
            }
            Err(e) => {
                let _ = st.machine.triage_failed();
                st.record_error(e.into())
            }
        }
    }

    /// Forget the current session: messages, flags and any triage result.
    /// Responses still in flight for it will be discarded on arrival.
    pub fn clear_session(&self) -> Outcome {
        let mut st = lock(&self.state);
        let from = st.status();
        let old = st.session_id.take();
        st.generation += 1;
        st.in_flight = false;
        st.machine.reset();
        st.triage_result = None;
        st.last_error = None;
        st.last_warning = None;
        if let Some(session_id) = old {
            let mut store = lock(&self.store);
            let r = store.clear_session(&session_id);
            st.note_store(&*store, r);
            info!(session_id = %session_id, "triage session cleared");
        }
        Outcome::Applied { from, to: st.status() }
    }

    /// Resume the store's current session after a restart. The persisted
    /// history is authoritative; triage flags start over.
    pub fn restore(&self) -> Outcome {
        let mut st = lock(&self.state);
        let status = st.status();
        if st.in_flight {
            return Outcome::Busy;
        }
        if st.session_id.is_some() {
            return Outcome::InvalidState { status, operation: "restore" };
        }
        let session_id = {
            let store = lock(&self.store);
            match store.current_session() {
                Some(id) if store.stats(id).count > 0 => id.to_string(),
                _ => return Outcome::Ignored(IgnoreReason::NothingToRestore),
            }
        };
        if st.machine.resume().is_err() {
            return Outcome::InvalidState { status, operation: "restore" };
        }
        st.generation += 1;
        st.session_id = Some(session_id.clone());
        info!(session_id = %session_id, "triage session restored from storage");
        Outcome::Applied { from: status, to: st.status() }
    }

    pub async fn health(&self) -> Result<HealthStatus, BackendError> {
        self.call(self.backend.health()).await
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.state).status()
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.state).session_id.clone()
    }

    pub fn last_error(&self) -> Option<TriageError> {
        lock(&self.state).last_error.clone()
    }

    pub fn clear_error(&self) {
        lock(&self.state).last_error = None;
    }

    pub fn triage_result(&self) -> Option<TriageResult> {
        lock(&self.state).triage_result.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        let st = lock(&self.state);
        match &st.session_id {
            Some(id) => lock(&self.store).session_messages(id),
            None => Vec::new(),
        }
    }

    pub fn numbered_transcript(&self) -> Vec<String> {
        to_numbered_transcript(&self.messages())
    }

    pub fn stats(&self) -> Option<SessionStats> {
        let st = lock(&self.state);
        st.session_id.as_ref().map(|id| lock(&self.store).stats(id))
    }

    pub fn store_stats(&self) -> StoreStats {
        lock(&self.store).global_stats()
    }

    pub fn export_history(&self) -> Result<String, StoreError> {
        lock(&self.store).export_json()
    }

    /// Replace the stored history. Only allowed while no session is current;
    /// follow with [`restore`](Self::restore) to continue the imported one.
    pub fn import_history(&self, json: &str) -> Result<(), TriageError> {
        let st = lock(&self.state);
        if st.session_id.is_some() || st.in_flight {
            return Err(TriageError::SessionActive(st.status()));
        }
        lock(&self.store).import_json(json)?;
        Ok(())
    }

    /// Retry pending persistence writes.
    pub fn flush_store(&self) -> Result<(), StoreError> {
        let result = lock(&self.store).flush();
        if result.is_ok() {
            lock(&self.state).last_warning = None;
        }
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        let st = lock(&self.state);
        let messages = match &st.session_id {
            Some(id) => lock(&self.store).session_messages(id),
            None => Vec::new(),
        };
        Snapshot {
            status: st.status(),
            session_id: st.session_id.clone(),
            has_enough_info: st.machine.has_enough_info(),
            triage_request: st.machine.triage_request(),
            triage_result: st.triage_result.clone(),
            last_error: st.last_error.clone(),
            last_warning: st.last_warning.clone(),
            in_flight: st.in_flight,
            messages,
        }
    }
}
