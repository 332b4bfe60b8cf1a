pub mod state;
pub mod history;
pub mod message;

pub use state::{SessionStatus, SessionStateMachine, TriageRequest};
pub use history::{to_numbered_transcript, numbered_transcript_text, to_backend_history, to_conversation_text};
pub use message::{Message, Role};
