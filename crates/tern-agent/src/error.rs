//! Error types for tern-agent

use thiserror::Error;

/// Result type alias using tern-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// A user turn is already waiting for its answer
    #[error("A user turn is already awaiting a reply")]
    PendingTurn,

    /// An assistant turn was appended with no user turn to answer
    #[error("No user turn is awaiting a reply")]
    NoPendingTurn,
}
