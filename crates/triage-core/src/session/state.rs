use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    NoSession,
    Active,
    AwaitingTriage,
    Complete,
    Errored { recoverable: bool },
}

impl SessionStatus {
    pub fn has_session(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::AwaitingTriage | SessionStatus::Complete)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Complete)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NoSession => write!(f, "no-session"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::AwaitingTriage => write!(f, "awaiting-triage"),
            SessionStatus::Complete => write!(f, "complete"),
            SessionStatus::Errored { recoverable: true } => write!(f, "errored (recoverable)"),
            SessionStatus::Errored { recoverable: false } => write!(f, "errored"),
        }
    }
}

/// Guard for the triage-result request. The boolean `has_enough_info` alone
/// cannot tell "already asked" from "asked and failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriageRequest {
    NotRequested,
    InFlight,
    Failed,
    Done,
}

impl TriageRequest {
    pub fn can_request(&self) -> bool {
        matches!(self, TriageRequest::NotRequested | TriageRequest::Failed)
    }
}

pub struct SessionStateMachine {
    current_state: SessionStatus,
    has_enough_info: bool,
    triage_request: TriageRequest,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: SessionStatus::NoSession,
            has_enough_info: false,
            triage_request: TriageRequest::NotRequested,
        }
    }

    pub fn current_state(&self) -> SessionStatus {
        self.current_state
    }

    pub fn has_enough_info(&self) -> bool {
        self.has_enough_info
    }

    pub fn triage_request(&self) -> TriageRequest {
        self.triage_request
    }

    pub fn can_transition_to(&self, new_state: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self.current_state, new_state) {
            (NoSession, Active) => true,
            (NoSession, Errored { .. }) => true,
            (Errored { recoverable: true }, Active) => true,
            (Errored { .. }, Errored { .. }) => true,
            (Active, AwaitingTriage) => true,
            (Active, Errored { .. }) => true,
            (AwaitingTriage, Complete) => true,
            (AwaitingTriage, Active) => true,
            (AwaitingTriage, Errored { .. }) => true,
            _ => false,
        }
    }

    pub fn transition_to(&mut self, new_state: SessionStatus) -> Result<(), TransitionError> {
        if self.can_transition_to(new_state) {
            self.current_state = new_state;
            Ok(())
        } else {
            Err(TransitionError { from: self.current_state, to: new_state })
        }
    }

    /// A session was created by the backend.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition_to(SessionStatus::Active)?;
        self.has_enough_info = false;
        self.triage_request = TriageRequest::NotRequested;
        Ok(())
    }

    /// Rehydrate an existing conversation without asking the backend.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        self.start()
    }

    pub fn fail(&mut self, recoverable: bool) -> Result<(), TransitionError> {
        self.transition_to(SessionStatus::Errored { recoverable })
    }

    /// Record a chat reply. Returns `true` when the caller must now fetch the
    /// triage result; the request is marked in flight before returning, so
    /// repeated `has_enough_info = true` replies fire at most one fetch.
    pub fn record_reply(&mut self, has_enough_info: bool) -> bool {
        // sticky: a later `false` never un-finishes the interview
        self.has_enough_info |= has_enough_info;
        if !has_enough_info || !self.triage_request.can_request() {
            return false;
        }
        self.begin_triage().is_ok()
    }

    /// Explicit fetch of the triage result.
    pub fn begin_triage(&mut self) -> Result<(), TransitionError> {
        if self.current_state != SessionStatus::AwaitingTriage {
            self.transition_to(SessionStatus::AwaitingTriage)?;
        }
        self.triage_request = TriageRequest::InFlight;
        Ok(())
    }

    pub fn triage_succeeded(&mut self) -> Result<(), TransitionError> {
        self.transition_to(SessionStatus::Complete)?;
        self.triage_request = TriageRequest::Done;
        Ok(())
    }

    /// Back to `Active`; `has_enough_info` stays set so the next reply retries.
    pub fn triage_failed(&mut self) -> Result<(), TransitionError> {
        self.transition_to(SessionStatus::Active)?;
        self.triage_request = TriageRequest::Failed;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
