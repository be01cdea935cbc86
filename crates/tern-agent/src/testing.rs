//! Scripted completion service for tests

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tern_ai::{
    Attempt, Capabilities, CompletionRequest, CompletionService, Error, Reply, ResponseEvent,
    ResponseEventStream, Result,
};

/// One scripted answer to a create or stream call
pub(crate) enum Step {
    Reply(Value),
    Fail(Error),
    /// Streamed events; `hang` keeps the stream open after the last one
    Events { events: Vec<ResponseEvent>, hang: bool },
}

/// Replays a fixed script and records every attempt it receives
pub(crate) struct ScriptedService {
    caps: Capabilities,
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(CompletionRequest, Attempt)>>,
}

impl ScriptedService {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: Step) -> &Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn reply(&self, raw: Value) -> &Self {
        self.push(Step::Reply(raw))
    }

    pub fn fail(&self, error: Error) -> &Self {
        self.push(Step::Fail(error))
    }

    pub fn calls(&self) -> Vec<(CompletionRequest, Attempt)> {
        self.calls.lock().clone()
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.calls.lock().iter().map(|(_, a)| *a).collect()
    }

    fn next_step(&self, request: &CompletionRequest, attempt: Attempt) -> Result<Step> {
        self.calls.lock().push((request.clone(), attempt));
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::UnexpectedResponse("script exhausted".into()))
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn create(&self, request: &CompletionRequest, attempt: Attempt) -> Result<Reply> {
        match self.next_step(request, attempt)? {
            Step::Reply(raw) => Ok(Reply::new(raw)),
            Step::Fail(e) => Err(e),
            Step::Events { .. } => Err(Error::UnexpectedResponse(
                "streamed step scripted for a create call".into(),
            )),
        }
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        attempt: Attempt,
    ) -> Result<ResponseEventStream> {
        let (events, hang) = match self.next_step(request, attempt)? {
            Step::Fail(e) => return Err(e),
            Step::Events { events, hang } => (events, hang),
            Step::Reply(raw) => {
                let reply = Reply::new(raw);
                let mut events = Vec::new();
                if let Some(text) = reply.text() {
                    events.push(ResponseEvent::TextDelta { delta: text });
                }
                events.push(ResponseEvent::Done { reply });
                (events, false)
            }
        };
        let stream = futures::stream::iter(events);
        if hang {
            Ok(Box::pin(stream.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(stream))
        }
    }
}

/// A completed Responses payload carrying `text`
pub(crate) fn text_reply(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "status": "completed",
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        }],
        "usage": {"input_tokens": 10, "output_tokens": 5}
    })
}

/// A reply that spent its whole budget on reasoning
pub(crate) fn truncated_reply() -> Value {
    json!({
        "id": "resp_cut",
        "status": "incomplete",
        "incomplete_details": {"reason": "max_output_tokens"},
        "output": [{"type": "reasoning", "summary": []}]
    })
}

/// A completed reply with no text at all
pub(crate) fn empty_reply() -> Value {
    json!({"id": "resp_empty", "status": "completed", "output": []})
}

/// The service refusing `text.verbosity`
pub(crate) fn verbosity_rejection() -> Error {
    Error::unsupported_parameter(
        Some("text.verbosity".into()),
        "Unsupported parameter: 'text.verbosity' is not supported with this model.",
    )
}

/// The service refusing `max_reasoning_tokens`
pub(crate) fn reasoning_cap_rejection() -> Error {
    Error::unsupported_parameter(
        Some("max_reasoning_tokens".into()),
        "Unknown parameter: 'max_reasoning_tokens'.",
    )
}
