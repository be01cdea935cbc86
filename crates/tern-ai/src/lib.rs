//! tern-ai: completion-service wire layer
//!
//! Request and reply types for OpenAI-style completion services, the
//! ordered reply-text extractor, streaming events, and the Responses and
//! Chat Completions providers.

pub mod error;
pub mod extract;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, FaultKind, Result};
pub use extract::extract_text;
pub use providers::CompletionService;
pub use stream::{ResponseEvent, ResponseEventStream, TextAccumulator};
pub use types::*;
