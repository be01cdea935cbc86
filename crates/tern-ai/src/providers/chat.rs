//! OpenAI-compatible Chat Completions provider (LM Studio, llama.cpp, ...)

use std::ops::ControlFlow;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{CompletionService, error_from_response};
use crate::{
    error::{Error, FaultKind, Result},
    stream::{ResponseEvent, ResponseEventStream},
    types::{Attempt, Capabilities, CompletionRequest, InputMessage, ReasoningEffort, Reply},
};

/// Default local endpoint root
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11435/v1";

/// Local servers accept any bearer token
pub const PLACEHOLDER_API_KEY: &str = "not-needed";

/// Chat Completions API client
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ChatCompletionsProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the provider at a different endpoint root
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionService for ChatCompletionsProvider {
    fn capabilities(&self) -> Capabilities {
        // reasoning_effort only; a server that refuses it drops to the minimal tier
        Capabilities {
            reasoning_effort: true,
            ..Capabilities::NONE
        }
    }

    async fn create(&self, request: &CompletionRequest, attempt: Attempt) -> Result<Reply> {
        let body = build_body(request, attempt, false);
        tracing::debug!(
            "POST {} model={} max_tokens={} tier={}",
            self.url(),
            request.model,
            attempt.max_output_tokens,
            attempt.tier
        );

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let raw: Value = response.json().await?;
        Ok(Reply::new(raw))
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        attempt: Attempt,
    ) -> Result<ResponseEventStream> {
        let body = build_body(request, attempt, true);
        let request_builder = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&body);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<InputMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn build_body(request: &CompletionRequest, attempt: Attempt, stream: bool) -> ChatBody {
    let messages = request.input.to_messages();

    if request.previous_response_id.is_some() {
        tracing::debug!("Chat completions has no server-side chaining; ignoring previous_response_id");
    }

    ChatBody {
        model: request.model.clone(),
        messages,
        max_tokens: attempt.max_output_tokens,
        reasoning_effort: request
            .reasoning_effort
            .filter(|_| attempt.tier.includes_reasoning()),
        stream,
    }
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Rebuild a non-streaming reply in the legacy `choices` shape
fn synthesize_reply(
    id: Option<&str>,
    text: &str,
    finish_reason: Option<&str>,
    usage: Option<&Value>,
) -> Reply {
    Reply::new(json!({
        "id": id,
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": finish_reason,
        }],
        "usage": usage,
    }))
}

/// Folds streamed chunks into the final reply
#[derive(Debug, Default)]
struct ChunkState {
    text: String,
    reply_id: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Value>,
    saw_chunk: bool,
}

impl ChunkState {
    /// Map one server-sent message.
    ///
    /// `Continue` carries the deltas it produced; `Break` carries the event
    /// that ends the stream (`[DONE]` or a malformed chunk).
    fn map_event(&mut self, data: &str) -> ControlFlow<ResponseEvent, Vec<ResponseEvent>> {
        if data.trim() == "[DONE]" {
            return ControlFlow::Break(self.finish());
        }

        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                return ControlFlow::Break(ResponseEvent::Error {
                    kind: FaultKind::Transport,
                    message: format!("Failed to parse chunk: {}", e),
                });
            }
        };

        self.saw_chunk = true;
        if self.reply_id.is_none() {
            self.reply_id = chunk.id;
        }
        let mut deltas = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                if !content.is_empty() {
                    self.text.push_str(&content);
                    deltas.push(ResponseEvent::TextDelta { delta: content });
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        ControlFlow::Continue(deltas)
    }

    /// The event that closes the stream
    fn finish(&mut self) -> ResponseEvent {
        if !self.saw_chunk {
            return ResponseEvent::Error {
                kind: FaultKind::Transport,
                message: "stream ended without any chunks".to_string(),
            };
        }
        ResponseEvent::Done {
            reply: synthesize_reply(
                self.reply_id.as_deref(),
                &std::mem::take(&mut self.text),
                self.finish_reason.as_deref(),
                self.usage.as_ref(),
            ),
        }
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = ResponseEvent> {
    stream! {
        let mut state = ChunkState::default();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => match state.map_event(&msg.data) {
                    ControlFlow::Continue(deltas) => {
                        for delta in deltas {
                            yield delta;
                        }
                    }
                    ControlFlow::Break(last) => {
                        yield last;
                        return;
                    }
                },
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(_, response)) => {
                    let err = error_from_response(response).await;
                    yield ResponseEvent::Error { kind: err.fault_kind(), message: err.to_string() };
                    return;
                }
                Err(e) => {
                    yield ResponseEvent::Error {
                        kind: FaultKind::Transport,
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        yield state.finish();
    }
}
