//! Streaming event types and utilities

use std::pin::Pin;

use tokio_stream::Stream;

use crate::error::FaultKind;
use crate::types::Reply;

/// Events emitted while a reply streams in
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// Next fragment of output text, in generation order
    TextDelta { delta: String },
    /// Terminal: the final reply (completed or incomplete)
    Done { reply: Reply },
    /// Terminal: the attempt failed
    Error { kind: FaultKind, message: String },
}

/// A stream of response events
pub type ResponseEventStream = Pin<Box<dyn Stream<Item = ResponseEvent> + Send>>;

/// Collects streamed deltas into the text seen so far
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one delta
    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    /// Trimmed text, or None if nothing but whitespace arrived
    pub fn finish(self) -> Option<String> {
        let trimmed = self.text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
