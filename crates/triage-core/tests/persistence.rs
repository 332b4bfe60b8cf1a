use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use triage_core::mocks::ScriptedBackend;
use triage_core::{
    ControllerConfig, FileKeyValueStore, IgnoreReason, KeyValueStore, MemoryKeyValueStore, MessageStore, Outcome,
    SessionStatus, StoreError, TriageError, TriageSessionController,
};

/// Memory store whose writes can be switched off, like a full disk.
#[derive(Clone, Default)]
struct SwitchableStore {
    inner: Arc<Mutex<MemoryKeyValueStore>>,
    fail: Arc<AtomicBool>,
}

impl KeyValueStore for SwitchableStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.lock().unwrap().get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("no space left on device".into()));
        }
        self.inner.lock().unwrap().set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("no space left on device".into()));
        }
        self.inner.lock().unwrap().remove(key)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.lock().unwrap().keys(prefix)
    }
}

fn file_controller(dir: &TempDir, backend: ScriptedBackend) -> TriageSessionController<ScriptedBackend, FileKeyValueStore> {
    let kv = FileKeyValueStore::open(dir.path()).unwrap();
    let store = MessageStore::open(kv).unwrap();
    TriageSessionController::new(backend, store, ControllerConfig::default())
}

#[tokio::test]
async fn test_restore_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let backend = ScriptedBackend::new().with_session("s1", "Hello").with_reply("How long?", false);
        let controller = file_controller(&dir, backend);
        controller.start_session().await;
        controller.send_message("sore throat").await;
    }

    let backend = ScriptedBackend::new().with_reply("Any fever?", false);
    let controller = file_controller(&dir, backend);
    assert_eq!(controller.status(), SessionStatus::NoSession);
    assert_eq!(
        controller.restore(),
        Outcome::Applied { from: SessionStatus::NoSession, to: SessionStatus::Active }
    );
    assert_eq!(controller.session_id().as_deref(), Some("s1"));
    assert_eq!(controller.numbered_transcript().len(), 3);

    controller.send_message("two days").await;
    let transcript = controller.numbered_transcript();
    assert_eq!(transcript[3], "4: [user] two days");
    assert_eq!(transcript[4], "5: [bot] Any fever?");

    // message ids keep counting across restarts
    let ids: Vec<u64> = controller.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    assert_eq!(controller.restore(), Outcome::InvalidState { status: SessionStatus::Active, operation: "restore" });
}

#[tokio::test]
async fn test_restore_with_empty_storage() {
    let dir = TempDir::new().unwrap();
    let controller = file_controller(&dir, ScriptedBackend::new());
    assert_eq!(controller.restore(), Outcome::Ignored(IgnoreReason::NothingToRestore));
}

#[tokio::test]
async fn test_cleared_session_is_not_restored() {
    let dir = TempDir::new().unwrap();
    {
        let controller = file_controller(&dir, ScriptedBackend::new().with_session("s1", "Hello"));
        controller.start_session().await;
        controller.clear_session();
    }
    let controller = file_controller(&dir, ScriptedBackend::new());
    assert_eq!(controller.restore(), Outcome::Ignored(IgnoreReason::NothingToRestore));
    assert_eq!(controller.store_stats().sessions, 0);
}

#[tokio::test]
async fn test_persistence_failure_is_a_warning() {
    let kv = SwitchableStore::default();
    kv.fail.store(true, Ordering::SeqCst);
    let store = MessageStore::open(kv.clone()).unwrap();
    let backend = ScriptedBackend::new().with_session("s1", "Hello").with_reply("How long?", false);
    let controller = TriageSessionController::new(backend, store, ControllerConfig::default());

    assert!(controller.start_session().await.is_applied());
    assert!(controller.send_message("nausea").await.is_applied());

    let snapshot = controller.snapshot();
    assert!(snapshot.last_warning.as_deref().unwrap().contains("no space left"));
    assert!(snapshot.last_error.is_none());
    assert_eq!(snapshot.messages.len(), 3);
    assert!(kv.inner.lock().unwrap().get("session/s1").unwrap().is_none());

    kv.fail.store(false, Ordering::SeqCst);
    controller.flush_store().unwrap();
    assert!(controller.snapshot().last_warning.is_none());
    assert!(kv.inner.lock().unwrap().get("session/s1").unwrap().is_some());
}

#[tokio::test]
async fn test_export_then_import_round_trip() {
    let backend = ScriptedBackend::new().with_session("s1", "Hello").with_reply("Where does it hurt?", false);
    let controller = TriageSessionController::in_memory(backend);
    controller.start_session().await;
    controller.send_message("my knee").await;

    let exported = controller.export_history().unwrap();
    assert!(matches!(controller.import_history(&exported), Err(TriageError::SessionActive(SessionStatus::Active))));

    let other = TriageSessionController::in_memory(ScriptedBackend::new());
    other.import_history(&exported).unwrap();
    assert!(other.restore().is_applied());
    assert_eq!(other.numbered_transcript(), controller.numbered_transcript());
}

#[tokio::test]
async fn test_import_rejects_gapped_sequence() {
    let controller = TriageSessionController::in_memory(ScriptedBackend::new());
    let json = r#"{
        "sessions": {
            "s1": {
                "last_sequence_number": 3,
                "messages": [
                    {"id": 1, "session_id": "s1", "role": "assistant", "content": "Hello",
                     "timestamp": "2024-05-01T10:00:00Z", "sequence_number": 1},
                    {"id": 2, "session_id": "s1", "role": "user", "content": "hi",
                     "timestamp": "2024-05-01T10:00:05Z", "sequence_number": 3}
                ]
            }
        },
        "last_message_id": 2,
        "current_session": "s1"
    }"#;
    let err = controller.import_history(json).unwrap_err();
    assert!(matches!(err, TriageError::Store(StoreError::Corrupt { .. })));
    assert_eq!(controller.store_stats().total_messages, 0);
}

#[tokio::test]
async fn test_warning_clears_once_a_later_write_catches_up() {
    let kv = SwitchableStore::default();
    let store = MessageStore::open(kv.clone()).unwrap();
    let backend = ScriptedBackend::new()
        .with_session("s1", "Hello")
        .with_reply("How long?", false)
        .with_reply("Any fever?", false);
    let controller = TriageSessionController::new(backend, store, ControllerConfig::default());
    controller.start_session().await;

    kv.fail.store(true, Ordering::SeqCst);
    assert!(controller.send_message("nausea").await.is_applied());
    assert!(controller.snapshot().last_warning.is_some());

    kv.fail.store(false, Ordering::SeqCst);
    assert!(controller.send_message("since this morning").await.is_applied());
    assert!(controller.snapshot().last_warning.is_none());

    let reopened = MessageStore::open(kv).unwrap();
    assert_eq!(reopened.session_messages("s1").len(), 5);
}
