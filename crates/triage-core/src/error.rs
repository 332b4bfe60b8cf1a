use std::time::Duration;
use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// Failures reported by the triage backend boundary. All of them are
/// recoverable: the caller may simply retry the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Operator guidance for server-side misconfigurations the backend is known
    /// to report through its error body.
    pub fn troubleshooting(&self) -> Option<&'static str> {
        let BackendError::Status { message, .. } = self else {
            return None;
        };
        let lower = message.to_lowercase();
        if lower.contains("faiss") || lower.contains("guidelines_faiss.index") {
            Some("Server configuration error: the medical guidelines index is missing. Place guidelines_faiss.index under the backend's guidelines/ directory and restart it.")
        } else if lower.contains("no such file or directory") {
            Some("Server is missing required files. Check the backend deployment.")
        } else if lower.contains("invalid session_id") || lower.contains("session not found") {
            Some("The backend no longer knows this session (it keeps sessions in memory). Start a new session.")
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The record is kept in memory; the write is retried on the next mutation.
    #[error("failed to persist session {session_id}: {reason}")]
    Persist { session_id: String, reason: String },

    #[error("stored entry {key} is unreadable: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

/// What the controller records in `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriageError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("history cannot be replaced while the session is {0}")]
    SessionActive(SessionStatus),
}

impl TriageError {
    pub fn troubleshooting(&self) -> Option<&'static str> {
        match self {
            TriageError::Backend(e) => e.troubleshooting(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_troubleshooting_hints() {
        let faiss = BackendError::Status {
            status: 500,
            message: "An error occurred: could not open guidelines_faiss.index".to_string(),
        };
        assert!(faiss.troubleshooting().unwrap().contains("guidelines index"));
        assert!(faiss.to_string().contains("guidelines_faiss.index"));

        let missing = BackendError::Status { status: 500, message: "No such file or directory".into() };
        assert!(missing.troubleshooting().is_some());

        let plain = BackendError::Status { status: 400, message: "session_id and message are required".into() };
        assert!(plain.troubleshooting().is_none());
        assert!(BackendError::Transport("refused".into()).troubleshooting().is_none());
    }

    #[test]
    fn test_every_backend_error_is_recoverable() {
        let errors = [
            BackendError::Transport("down".into()),
            BackendError::Timeout(Duration::from_secs(1)),
            BackendError::Status { status: 503, message: "busy".into() },
            BackendError::Malformed("eof".into()),
        ];
        assert!(errors.iter().all(BackendError::is_recoverable));
    }
}
