pub mod controller;
pub mod error;
pub mod ports;
pub mod session;
pub mod store;

pub use controller::{ControllerConfig, IgnoreReason, Outcome, Snapshot, TriageSessionController, DEFAULT_REQUEST_TIMEOUT};
pub use error::{BackendError, StoreError, TransitionError, TriageError};
pub use ports::{ChatReply, FileKeyValueStore, HealthStatus, KeyValueStore, MemoryKeyValueStore, SessionGreeting, TriageBackend, TriageResult};
pub use session::{Message, Role, SessionStatus, TriageRequest};
pub use store::{MessageStore, SessionStats, StoreStats};

/// In-process backends for tests and the demo binary.
pub mod mocks {
    use super::*;
    use async_trait::async_trait;
    use protocol::{HistoryEntry, Symptom, UrgencyLevel};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A call the scripted backend received, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RecordedCall {
        StartSession,
        SendMessage { session_id: String, message: String, history: Vec<HistoryEntry> },
        FetchTriage { session_id: String },
    }

    /// Replays queued responses. An empty queue yields a fresh session for
    /// `start_session` and errors for everything else.
    #[derive(Default)]
    pub struct ScriptedBackend {
        sessions: Mutex<VecDeque<Result<SessionGreeting, BackendError>>>,
        replies: Mutex<VecDeque<Result<ChatReply, BackendError>>>,
        triage: Mutex<VecDeque<Result<TriageResult, BackendError>>>,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_session(self, session_id: &str, greeting: &str) -> Self {
            self.push_session(Ok(SessionGreeting { session_id: session_id.into(), greeting: greeting.into() }));
            self
        }

        pub fn with_reply(self, reply: &str, has_enough_info: bool) -> Self {
            self.push_reply(Ok(ChatReply { reply: reply.into(), has_enough_info, triage_complete: false }));
            self
        }

        pub fn with_triage(self, session_id: &str, urgency: UrgencyLevel, symptoms: Vec<Symptom>) -> Self {
            self.push_triage(Ok(TriageResult {
                session_id: session_id.into(),
                symptoms,
                urgency,
                reason: None,
            }));
            self
        }

        pub fn push_session(&self, result: Result<SessionGreeting, BackendError>) {
            self.sessions.lock().unwrap().push_back(result);
        }

        pub fn push_reply(&self, result: Result<ChatReply, BackendError>) {
            self.replies.lock().unwrap().push_back(result);
        }

        pub fn push_triage(&self, result: Result<TriageResult, BackendError>) {
            self.triage.lock().unwrap().push_back(result);
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn fetch_triage_calls(&self) -> usize {
            self.calls().iter().filter(|c| matches!(c, RecordedCall::FetchTriage { .. })).count()
        }

        /// History sent with the most recent chat call.
        pub fn last_history(&self) -> Option<Vec<HistoryEntry>> {
            self.calls().into_iter().rev().find_map(|c| match c {
                RecordedCall::SendMessage { history, .. } => Some(history),
                _ => None,
            })
        }

        fn record(&self, call: RecordedCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl TriageBackend for ScriptedBackend {
        async fn start_session(&self) -> Result<SessionGreeting, BackendError> {
            self.record(RecordedCall::StartSession);
            let next = self.sessions.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(SessionGreeting {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    greeting: "Hello! What brings you in today?".into(),
                })
            })
        }

        async fn send_message(&self, session_id: &str, message: &str, history: &[HistoryEntry]) -> Result<ChatReply, BackendError> {
            self.record(RecordedCall::SendMessage {
                session_id: session_id.into(),
                message: message.into(),
                history: history.to_vec(),
            });
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(BackendError::Transport("no scripted reply".into())))
        }

        async fn fetch_triage(&self, session_id: &str) -> Result<TriageResult, BackendError> {
            self.record(RecordedCall::FetchTriage { session_id: session_id.into() });
            let next = self.triage.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Err(BackendError::Status { status: 400, message: "Triage not yet completed".into() })
            })
        }

        async fn health(&self) -> Result<HealthStatus, BackendError> {
            Ok(HealthStatus { healthy: true, status: "healthy".into(), message: Some("scripted".into()) })
        }
    }
}
