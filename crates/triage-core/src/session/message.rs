use chrono::{DateTime, Utc};
use protocol::HistoryRole;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used on the wire and in the numbered transcript.
    pub fn label(&self) -> &'static str {
        self.history_role().as_str()
    }

    pub fn history_role(&self) -> HistoryRole {
        match self {
            Role::User => HistoryRole::User,
            Role::Assistant => HistoryRole::Bot,
        }
    }
}

impl From<HistoryRole> for Role {
    fn from(role: HistoryRole) -> Self {
        match role {
            HistoryRole::User => Role::User,
            HistoryRole::Bot => Role::Assistant,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One turn of a triage conversation, exactly as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
