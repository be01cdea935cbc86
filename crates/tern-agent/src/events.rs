//! Session event types

use crate::compaction::{CompactionOutcome, CompactionReason};
use crate::retrieval::RestartReason;

/// Progress events emitted while a session handles a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Context compression is about to run
    CompactionStart { reason: CompactionReason },

    /// Context compression finished
    CompactionEnd {
        reason: CompactionReason,
        outcome: CompactionOutcome,
    },

    /// Streamed reply text
    TextDelta { delta: String },

    /// The previous attempt produced nothing usable; another one starts
    AttemptRestart {
        max_output_tokens: u32,
        reason: RestartReason,
    },
}
