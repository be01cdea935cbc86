//! OpenAI Responses API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Serialize;
use serde_json::Value;

use super::{CompletionService, error_from_response};
use crate::{
    error::{Error, FaultKind, Result, is_parameter_rejection_message},
    stream::{ResponseEvent, ResponseEventStream},
    types::{
        Attempt, Capabilities, CompletionRequest, Input, ReasoningEffort, Reply, Verbosity,
    },
};

/// Default endpoint root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Responses API client
pub struct ResponsesProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ResponsesProvider {
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
        format!("{}/responses", self.base_url)
    }
}

#[async_trait]
impl CompletionService for ResponsesProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn create(&self, request: &CompletionRequest, attempt: Attempt) -> Result<Reply> {
        let body = build_body(request, attempt, false);
        tracing::debug!(
            "POST {} model={} max_output_tokens={} tier={}",
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
        tracing::debug!(
            "POST {} (stream) model={} max_output_tokens={} tier={}",
            self.url(),
            request.model,
            attempt.max_output_tokens,
            attempt.tier
        );

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
struct ResponsesBody<'a> {
    model: &'a str,
    input: &'a Input,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_reasoning_tokens: Option<u32>,
    tool_choice: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ReasoningParam {
    effort: ReasoningEffort,
}

#[derive(Debug, Serialize)]
struct TextParam {
    verbosity: Verbosity,
}

/// Serialize one attempt; the tier decides which optional fields go out
fn build_body<'a>(request: &'a CompletionRequest, attempt: Attempt, stream: bool) -> ResponsesBody<'a> {
    let tier = attempt.tier;
    ResponsesBody {
        model: &request.model,
        input: &request.input,
        max_output_tokens: attempt.max_output_tokens,
        reasoning: request
            .reasoning_effort
            .filter(|_| tier.includes_reasoning())
            .map(|effort| ReasoningParam { effort }),
        max_reasoning_tokens: request.reasoning_cap.filter(|_| tier.includes_reasoning()),
        tool_choice: "none",
        text: request
            .verbosity
            .filter(|_| tier.includes_verbosity())
            .map(|verbosity| TextParam { verbosity }),
        previous_response_id: request.previous_response_id.as_deref(),
        stream,
    }
}

fn stream_error(message: impl Into<String>) -> ResponseEvent {
    let message = message.into();
    let kind = if is_parameter_rejection_message(&message) {
        FaultKind::UnsupportedParameter
    } else {
        FaultKind::Transport
    };
    ResponseEvent::Error { kind, message }
}

/// Map one server-sent message to a stream event.
///
/// `fallback_type` is the SSE event name, used when the payload has no `type`.
/// Returns `None` for messages that carry nothing for the caller.
fn map_event(data: &Value, fallback_type: &str) -> Option<ResponseEvent> {
    let event_type = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(fallback_type);

    match event_type {
        "response.output_text.delta" => data
            .get("delta")
            .and_then(Value::as_str)
            .map(|delta| ResponseEvent::TextDelta {
                delta: delta.to_string(),
            }),
        "response.completed" | "response.incomplete" => {
            let reply = data.get("response").cloned().unwrap_or(Value::Null);
            Some(ResponseEvent::Done {
                reply: Reply::new(reply),
            })
        }
        "response.failed" => {
            let message = data
                .pointer("/response/error/message")
                .and_then(Value::as_str)
                .unwrap_or("response failed");
            Some(stream_error(message))
        }
        "error" => {
            let message = data
                .get("message")
                .or_else(|| data.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("stream error");
            Some(stream_error(message))
        }
        _ => None,
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = ResponseEvent> {
    stream! {
        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    let data: Value = match serde_json::from_str(&msg.data) {
                        Ok(data) => data,
                        Err(e) => {
                            yield stream_error(format!("Failed to parse event: {}", e));
                            return;
                        }
                    };
                    let Some(event) = map_event(&data, &msg.event) else {
                        continue;
                    };
                    let terminal = !matches!(event, ResponseEvent::TextDelta { .. });
                    yield event;
                    if terminal {
                        return;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(_, response)) => {
                    let err = error_from_response(response).await;
                    yield ResponseEvent::Error { kind: err.fault_kind(), message: err.to_string() };
                    return;
                }
                Err(e) => {
                    yield stream_error(format!("SSE error: {}", e));
                    return;
                }
            }
        }

        yield ResponseEvent::Error {
            kind: FaultKind::Transport,
            message: "stream ended before the response completed".to_string(),
        };
    }
}
