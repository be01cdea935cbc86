//! Core types for completion requests and replies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract;

/// Supported wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    /// `POST /responses`, with server-side chaining
    #[default]
    Responses,
    /// `POST /chat/completions` (LM Studio and other OpenAI-compatible servers)
    ChatCompletions,
}

impl Api {
    /// Short name used in config files and flags
    pub fn name(&self) -> &'static str {
        match self {
            Api::Responses => "responses",
            Api::ChatCompletions => "chat",
        }
    }
}

impl FromStr for Api {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "responses" | "response" => Ok(Api::Responses),
            "chat" | "chat-completions" | "completions" => Ok(Api::ChatCompletions),
            other => Err(format!("unknown api '{other}' (expected responses or chat)")),
        }
    }
}

/// Role of an input entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One `{role, content}` entry of a request input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request input: a flat prompt or an ordered list of entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Text(String),
    Messages(Vec<InputMessage>),
}

impl Input {
    /// Prompt size in characters, for diagnostics
    pub fn char_len(&self) -> usize {
        match self {
            Input::Text(text) => text.chars().count(),
            Input::Messages(messages) => messages.iter().map(|m| m.content.chars().count()).sum(),
        }
    }

    /// View the input as entries; a flat prompt becomes one user entry
    pub fn to_messages(&self) -> Vec<InputMessage> {
        match self {
            Input::Text(text) => vec![InputMessage::user(text.clone())],
            Input::Messages(messages) => messages.clone(),
        }
    }
}

impl From<Vec<InputMessage>> for Input {
    fn from(messages: Vec<InputMessage>) -> Self {
        Input::Messages(messages)
    }
}

impl From<&str> for Input {
    fn from(text: &str) -> Self {
        Input::Text(text.to_string())
    }
}

/// Hint for how much hidden deliberation the model should spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minimal" | "min" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" | "med" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!(
                "unknown reasoning effort '{other}' (expected minimal, low, medium or high)"
            )),
        }
    }
}

/// Output verbosity hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Verbosity::Low),
            "medium" | "med" => Ok(Verbosity::Medium),
            "high" => Ok(Verbosity::High),
            other => Err(format!(
                "unknown verbosity '{other}' (expected low, medium or high)"
            )),
        }
    }
}

/// Which optional request fields a service version accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Accepts `text.verbosity`
    pub verbosity: bool,
    /// Accepts `max_reasoning_tokens`
    pub reasoning_cap: bool,
    /// Accepts a reasoning effort hint
    pub reasoning_effort: bool,
    /// Retains prior turns keyed by `previous_response_id`
    pub server_chaining: bool,
}

impl Capabilities {
    /// Everything the Responses endpoint is known to accept
    pub const ALL: Capabilities = Capabilities {
        verbosity: true,
        reasoning_cap: true,
        reasoning_effort: true,
        server_chaining: true,
    };

    /// A bare endpoint with no optional knobs
    pub const NONE: Capabilities = Capabilities {
        verbosity: false,
        reasoning_cap: false,
        reasoning_effort: false,
        server_chaining: false,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::ALL
    }
}

/// Parameter degradation tier, most- to least-featured.
///
/// Tiers only move downwards, and only after the service rejects a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ParamTier {
    /// Verbosity hint and reasoning cap included
    #[default]
    Full,
    /// Verbosity hint dropped
    NoVerbosity,
    /// Verbosity hint and reasoning fields dropped
    Minimal,
}

impl ParamTier {
    /// The next, less-featured tier, if any
    pub fn degrade(self) -> Option<ParamTier> {
        match self {
            ParamTier::Full => Some(ParamTier::NoVerbosity),
            ParamTier::NoVerbosity => Some(ParamTier::Minimal),
            ParamTier::Minimal => None,
        }
    }

    /// Starting tier for a service with the given capabilities
    pub fn for_capabilities(caps: Capabilities) -> ParamTier {
        if !caps.verbosity && !caps.reasoning_cap && !caps.reasoning_effort {
            ParamTier::Minimal
        } else if !caps.verbosity {
            ParamTier::NoVerbosity
        } else {
            ParamTier::Full
        }
    }

    pub fn includes_verbosity(self) -> bool {
        self == ParamTier::Full
    }

    pub fn includes_reasoning(self) -> bool {
        self != ParamTier::Minimal
    }
}

impl fmt::Display for ParamTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamTier::Full => "full",
            ParamTier::NoVerbosity => "no-verbosity",
            ParamTier::Minimal => "minimal",
        };
        f.write_str(name)
    }
}

/// A fully formed logical request, independent of the output budget
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Conversational input
    pub input: Input,
    /// Reasoning-effort hint
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Cap on hidden reasoning tokens
    pub reasoning_cap: Option<u32>,
    /// Verbosity hint
    pub verbosity: Option<Verbosity>,
    /// Prior reply id for server-side chaining
    pub previous_response_id: Option<String>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, input: impl Into<Input>) -> Self {
        Self {
            model: model.into(),
            input: input.into(),
            reasoning_effort: None,
            reasoning_cap: None,
            verbosity: None,
            previous_response_id: None,
        }
    }

    pub fn with_reasoning_effort(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_reasoning_cap(mut self, cap: Option<u32>) -> Self {
        self.reasoning_cap = cap;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Option<Verbosity>) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_previous_response_id(mut self, id: Option<String>) -> Self {
        self.previous_response_id = id;
        self
    }
}

/// Per-attempt knobs chosen by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Output ceiling for this attempt
    pub max_output_tokens: u32,
    /// Which optional fields to send
    pub tier: ParamTier,
}

/// Token usage reported by the service (diagnostics only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
}

/// Status value of a reply that ran out of output room
pub const STATUS_INCOMPLETE: &str = "incomplete";
/// Incomplete reason that triggers budget escalation
pub const REASON_MAX_OUTPUT_TOKENS: &str = "max_output_tokens";

/// A completion-service reply, kept as the raw JSON payload.
///
/// The payload shape varies by endpoint, model family and server version, so
/// fields are read through lenient accessors rather than a fixed schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    raw: Value,
}

impl Reply {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    /// Reply id, usable as the next request's `previous_response_id`
    pub fn id(&self) -> Option<&str> {
        self.raw.get("id").and_then(Value::as_str)
    }

    /// Reply status ("completed", "incomplete", ...).
    ///
    /// Chat-completions payloads have no status; a `length` finish reason is
    /// reported as incomplete and anything else as completed.
    pub fn status(&self) -> Option<&str> {
        if let Some(status) = self.raw.get("status").and_then(Value::as_str) {
            return Some(status);
        }
        self.finish_reason().map(|reason| {
            if reason == "length" {
                STATUS_INCOMPLETE
            } else {
                "completed"
            }
        })
    }

    /// `incomplete_details.reason`, or the chat equivalent
    pub fn incomplete_reason(&self) -> Option<&str> {
        if let Some(reason) = self
            .raw
            .get("incomplete_details")
            .and_then(|d| d.get("reason"))
            .and_then(Value::as_str)
        {
            return Some(reason);
        }
        match self.finish_reason() {
            Some("length") => Some(REASON_MAX_OUTPUT_TOKENS),
            _ => None,
        }
    }

    /// Whether the service stopped because the output ceiling was hit
    pub fn is_truncated(&self) -> bool {
        self.status() == Some(STATUS_INCOMPLETE)
            && self.incomplete_reason() == Some(REASON_MAX_OUTPUT_TOKENS)
    }

    /// Extract the reply text, if any
    pub fn text(&self) -> Option<String> {
        extract::extract_text(&self.raw)
    }

    /// Token usage, read from either wire shape
    pub fn usage(&self) -> Usage {
        let Some(usage) = self.raw.get("usage") else {
            return Usage::default();
        };
        let read = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| usage.get(*k).and_then(Value::as_u64))
                .unwrap_or(0)
        };
        Usage {
            input_tokens: read(&["input_tokens", "prompt_tokens"]),
            output_tokens: read(&["output_tokens", "completion_tokens"]),
            reasoning_tokens: ["output_tokens_details", "completion_tokens_details"]
                .iter()
                .find_map(|k| {
                    usage
                        .get(*k)
                        .and_then(|d| d.get("reasoning_tokens"))
                        .and_then(Value::as_u64)
                })
                .unwrap_or(0),
        }
    }

    fn finish_reason(&self) -> Option<&str> {
        self.raw
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
    }
}

impl From<Value> for Reply {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}
