//! Append-only, session-scoped message log with stable 1-based numbering.
//!
//! The key/value storage is the source of truth: [`MessageStore::open`]
//! rehydrates everything from it. Layout:
//!
//! - `session/<id>`: `{ last_sequence_number, messages: [...] }`
//! - `last_message_id`: global id counter shared by all sessions
//! - `current_session`: id of the conversation to resume after a restart
//!
//! The store assumes a single writer (the controller holds it behind a mutex).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::ports::storage::KeyValueStore;
use crate::session::{Message, Role};

const SESSION_PREFIX: &str = "session/";
const LAST_MESSAGE_ID_KEY: &str = "last_message_id";
const CURRENT_SESSION_KEY: &str = "current_session";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLog {
    pub last_sequence_number: u64,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub count: usize,
    pub last_sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_messages: usize,
    pub sessions: usize,
    pub last_message_id: u64,
    pub current_session: Option<String>,
}

/// Whole-store snapshot used by export/import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreExport {
    pub sessions: BTreeMap<String, SessionLog>,
    pub last_message_id: u64,
    pub current_session: Option<String>,
}

pub struct MessageStore<K: KeyValueStore> {
    kv: K,
    sessions: BTreeMap<String, SessionLog>,
    last_message_id: u64,
    current_session: Option<String>,
    dirty: BTreeSet<String>,
    removed: BTreeSet<String>,
    meta_dirty: bool,
}

fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

impl<K: KeyValueStore> MessageStore<K> {
    /// A store over `kv` that loads nothing. Entries already in `kv` are
    /// ignored; use [`open`](Self::open) for persisted data.
    pub fn empty(kv: K) -> Self {
        Self {
            kv,
            sessions: BTreeMap::new(),
            last_message_id: 0,
            current_session: None,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
            meta_dirty: false,
        }
    }

    /// Load every persisted session from `kv`.
    pub fn open(kv: K) -> Result<Self, StoreError> {
        let mut sessions = BTreeMap::new();
        for key in kv.keys(SESSION_PREFIX)? {
            let Some(raw) = kv.get(&key)? else { continue };
            let log: SessionLog = serde_json::from_str(&raw)
                .map_err(|e| StoreError::Corrupt { key: key.clone(), reason: e.to_string() })?;
            let session_id = key[SESSION_PREFIX.len()..].to_string();
            validate_log(&session_id, &log)?;
            sessions.insert(session_id, log);
        }

        let stored_last_id = match kv.get(LAST_MESSAGE_ID_KEY)? {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| StoreError::Corrupt {
                key: LAST_MESSAGE_ID_KEY.to_string(),
                reason: e.to_string(),
            })?,
            None => 0,
        };
        // never hand out an id that is already on disk
        let max_seen = sessions
            .values()
            .flat_map(|log| log.messages.iter().map(|m| m.id))
            .max()
            .unwrap_or(0);

        let current_session = kv.get(CURRENT_SESSION_KEY)?.filter(|s| !s.trim().is_empty());

        debug!(sessions = sessions.len(), last_message_id = stored_last_id.max(max_seen), "message store opened");
        Ok(Self {
            kv,
            sessions,
            last_message_id: stored_last_id.max(max_seen),
            current_session,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
            meta_dirty: false,
        })
    }

    /// Append a turn. On a persistence failure the message stays in memory,
    /// [`StoreError::Persist`] is returned and the write is retried by the
    /// next mutation (or an explicit [`flush`](Self::flush)).
    pub fn append(&mut self, session_id: &str, role: Role, content: &str) -> Result<Message, StoreError> {
        let log = self.sessions.entry(session_id.to_string()).or_default();
        let sequence_number = log.last_sequence_number + 1;
        self.last_message_id += 1;

        let message = Message {
            id: self.last_message_id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            sequence_number,
        };
        log.messages.push(message.clone());
        log.last_sequence_number = sequence_number;

        self.removed.remove(session_id);
        self.dirty.insert(session_id.to_string());
        self.meta_dirty = true;
        debug!(session_id, sequence_number, role = %role, "message appended");

        self.flush()?;
        Ok(message)
    }

    /// Messages of exactly one session, in append order.
    pub fn session_messages(&self, session_id: &str) -> Vec<Message> {
        self.sessions.get(session_id).map(|log| log.messages.clone()).unwrap_or_default()
    }

    pub fn last_user_message(&self, session_id: &str) -> Option<Message> {
        self.sessions
            .get(session_id)
            .and_then(|log| log.messages.iter().rev().find(|m| m.is_user()).cloned())
    }

    /// Drop a session's messages and reset its sequence counter.
    pub fn clear_session(&mut self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.remove(session_id);
        self.dirty.remove(session_id);
        self.removed.insert(session_id.to_string());
        if self.current_session.as_deref() == Some(session_id) {
            self.current_session = None;
            self.meta_dirty = true;
        }
        debug!(session_id, "session cleared");
        self.flush()
    }

    pub fn stats(&self, session_id: &str) -> SessionStats {
        match self.sessions.get(session_id) {
            Some(log) => SessionStats { count: log.messages.len(), last_sequence_number: log.last_sequence_number },
            None => SessionStats { count: 0, last_sequence_number: 0 },
        }
    }

    pub fn global_stats(&self) -> StoreStats {
        StoreStats {
            total_messages: self.sessions.values().map(|log| log.messages.len()).sum(),
            sessions: self.sessions.len(),
            last_message_id: self.last_message_id,
            current_session: self.current_session.clone(),
        }
    }

    /// Mark `session_id` as the conversation to resume after a restart.
    pub fn begin_session(&mut self, session_id: &str) -> Result<(), StoreError> {
        self.current_session = Some(session_id.to_string());
        self.meta_dirty = true;
        self.flush()
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty() || self.meta_dirty
    }

    /// Write every pending change. All entries are attempted; the first
    /// failure is reported and the rest stay pending.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let mut failure: Option<StoreError> = None;

        for session_id in self.removed.clone() {
            match self.kv.remove(&session_key(&session_id)) {
                Ok(()) => {
                    self.removed.remove(&session_id);
                }
                Err(e) => {
                    failure.get_or_insert(StoreError::Persist { session_id, reason: e.to_string() });
                }
            }
        }

        for session_id in self.dirty.clone() {
            let Some(log) = self.sessions.get(&session_id) else {
                self.dirty.remove(&session_id);
                continue;
            };
            let result = serde_json::to_string(log)
                .map_err(|e| StoreError::Storage(e.to_string()))
                .and_then(|raw| self.kv.set(&session_key(&session_id), &raw));
            match result {
                Ok(()) => {
                    self.dirty.remove(&session_id);
                }
                Err(e) => {
                    failure.get_or_insert(StoreError::Persist { session_id, reason: e.to_string() });
                }
            }
        }

        if self.meta_dirty {
            let result = self.write_meta();
            match result {
                Ok(()) => self.meta_dirty = false,
                Err(e) => {
                    failure.get_or_insert(StoreError::Persist {
                        session_id: self.current_session.clone().unwrap_or_default(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match failure {
            Some(e) => {
                warn!(error = %e, "message store write failed; keeping in-memory state");
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn write_meta(&mut self) -> Result<(), StoreError> {
        self.kv.set(LAST_MESSAGE_ID_KEY, &self.last_message_id.to_string())?;
        match &self.current_session {
            Some(id) => self.kv.set(CURRENT_SESSION_KEY, id),
            None => self.kv.remove(CURRENT_SESSION_KEY),
        }
    }

    pub fn export(&self) -> StoreExport {
        StoreExport {
            sessions: self.sessions.clone(),
            last_message_id: self.last_message_id,
            current_session: self.current_session.clone(),
        }
    }

    pub fn export_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(&self.export()).map_err(|e| StoreError::Storage(e.to_string()))
    }

    /// Replace the whole store with `json`. The import is validated first; an
    /// invalid document leaves the store untouched.
    pub fn import_json(&mut self, json: &str) -> Result<(), StoreError> {
        let import: StoreExport = serde_json::from_str(json)
            .map_err(|e| StoreError::Corrupt { key: "import".to_string(), reason: e.to_string() })?;
        validate_import(&import)?;

        for session_id in self.sessions.keys() {
            if !import.sessions.contains_key(session_id) {
                self.removed.insert(session_id.clone());
            }
        }
        self.dirty = import.sessions.keys().cloned().collect();
        for session_id in &self.dirty {
            self.removed.remove(session_id);
        }
        let max_seen = import
            .sessions
            .values()
            .flat_map(|log| log.messages.iter().map(|m| m.id))
            .max()
            .unwrap_or(0);
        self.last_message_id = import.last_message_id.max(max_seen);
        self.current_session = import.current_session;
        self.sessions = import.sessions;
        self.meta_dirty = true;
        self.flush()
    }
}

fn validate_import(import: &StoreExport) -> Result<(), StoreError> {
    for (session_id, log) in &import.sessions {
        validate_log(session_id, log)?;
    }
    Ok(())
}

/// A log must number its messages 1..=n and its counter must sit at n.
fn validate_log(session_id: &str, log: &SessionLog) -> Result<(), StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { key: session_key(session_id), reason };
    for (index, message) in log.messages.iter().enumerate() {
        if message.session_id != session_id {
            return Err(corrupt(format!("message {} belongs to session {}", message.id, message.session_id)));
        }
        if message.sequence_number != index as u64 + 1 {
            return Err(corrupt(format!(
                "expected sequence number {}, found {}",
                index + 1,
                message.sequence_number
            )));
        }
    }
    if log.last_sequence_number != log.messages.len() as u64 {
        return Err(corrupt(format!(
            "sequence counter is {} but the log holds {} messages",
            log.last_sequence_number,
            log.messages.len()
        )));
    }
    Ok(())
}
