//! tern-agent: conversation runtime
//!
//! This crate owns the conversation state, decides when to fold old turns
//! into a running summary, and retrieves answers from a completion service
//! that may truncate output or reject optional parameters.

pub mod assembly;
pub mod compaction;
pub mod conversation;
pub mod error;
pub mod events;
pub mod retrieval;
pub mod session;
pub mod verify;

#[cfg(test)]
mod testing;

pub use compaction::{CompactionConfig, CompactionOutcome, CompactionReason};
pub use conversation::{Conversation, HistoryMode, SUMMARY_MARKER, Turn, TurnRole};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use retrieval::{
    CompletionClient, ExhaustReason, Outcome, RequestOptions, RestartReason, Retrieval, StreamUpdate,
};
pub use session::{Session, SessionConfig, TurnOutcome};
pub use verify::{Verifier, VerifierConfig};
