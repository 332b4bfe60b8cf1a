pub mod backend;
pub mod storage;

pub use backend::{TriageBackend, SessionGreeting, ChatReply, TriageResult, HealthStatus};
pub use storage::{KeyValueStore, MemoryKeyValueStore, FileKeyValueStore};
