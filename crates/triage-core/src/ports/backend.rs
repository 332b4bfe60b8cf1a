use async_trait::async_trait;
use protocol::{HistoryEntry, Symptom, UrgencyLevel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGreeting {
    pub session_id: String,
    pub greeting: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub has_enough_info: bool,
    pub triage_complete: bool,
}

/// Terminal output of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageResult {
    pub session_id: String,
    pub symptoms: Vec<Symptom>,
    pub urgency: UrgencyLevel,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub status: String,
    pub message: Option<String>,
}

impl TryFrom<protocol::StartSessionResponse> for SessionGreeting {
    type Error = BackendError;

    fn try_from(resp: protocol::StartSessionResponse) -> Result<Self, Self::Error> {
        if resp.session_id.trim().is_empty() {
            return Err(BackendError::Malformed("start-session response has an empty session_id".into()));
        }
        Ok(Self { session_id: resp.session_id, greeting: resp.bot_message })
    }
}

impl From<protocol::ChatResponse> for ChatReply {
    fn from(resp: protocol::ChatResponse) -> Self {
        Self {
            reply: resp.bot_message,
            has_enough_info: resp.has_enough_info,
            triage_complete: resp.triage_complete,
        }
    }
}

impl TriageResult {
    /// The endpoint does not always echo the session id; fall back to the one
    /// that was requested.
    pub fn from_wire(resp: protocol::TriageResponse, requested_session_id: &str) -> Self {
        Self {
            session_id: resp
                .session_id
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| requested_session_id.to_string()),
            symptoms: resp.symptoms,
            urgency: resp.urgency_level,
            reason: resp.reason,
        }
    }
}

impl From<protocol::HealthResponse> for HealthStatus {
    fn from(resp: protocol::HealthResponse) -> Self {
        let healthy = matches!(resp.status.as_str(), "healthy" | "ok" | "up");
        Self { healthy, status: resp.status, message: resp.message }
    }
}

/// The external triage service as seen by the controller.
#[async_trait]
pub trait TriageBackend: Send + Sync {
    async fn start_session(&self) -> Result<SessionGreeting, BackendError>;

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<ChatReply, BackendError>;

    async fn fetch_triage(&self, session_id: &str) -> Result<TriageResult, BackendError>;

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        Err(BackendError::Transport("health probe not supported by this backend".into()))
    }
}

#[async_trait]
impl<T: TriageBackend + ?Sized> TriageBackend for Arc<T> {
    async fn start_session(&self) -> Result<SessionGreeting, BackendError> {
        (**self).start_session().await
    }

    async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<ChatReply, BackendError> {
        (**self).send_message(session_id, message, history).await
    }

    async fn fetch_triage(&self, session_id: &str) -> Result<TriageResult, BackendError> {
        (**self).fetch_triage(session_id).await
    }

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        (**self).health().await
    }
}
