//! Completion-service providers

pub mod chat;
pub mod responses;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    Api, Attempt, Capabilities, CompletionRequest, Error, Reply, ResponseEventStream, Result,
    error::is_parameter_rejection_message,
};

pub use chat::ChatCompletionsProvider;
pub use responses::ResponsesProvider;

/// A completion service that can answer one attempt of a logical request
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Which optional fields this service accepts
    fn capabilities(&self) -> Capabilities;

    /// Issue one attempt and wait for the whole reply
    async fn create(&self, request: &CompletionRequest, attempt: Attempt) -> Result<Reply>;

    /// Issue one attempt and stream the reply
    async fn stream(
        &self,
        request: &CompletionRequest,
        attempt: Attempt,
    ) -> Result<ResponseEventStream>;
}

/// Build the provider for a wire protocol
pub fn connect(api: Api, base_url: &str, api_key: impl Into<String>) -> Arc<dyn CompletionService> {
    match api {
        Api::Responses => Arc::new(ResponsesProvider::new(api_key).with_base_url(base_url)),
        Api::ChatCompletions => {
            Arc::new(ChatCompletionsProvider::new(api_key).with_base_url(base_url))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Turn a non-success HTTP response body into a typed error
pub(crate) fn error_from_body(status: u16, body: &str) -> Error {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        if status == 401 {
            return Error::InvalidApiKey;
        }
        return Error::api(status, "http_error", body.trim());
    };
    let err = envelope.error;
    let code = err
        .code
        .as_ref()
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let rejected = matches!(code.as_str(), "unsupported_parameter" | "unsupported_value")
        || is_parameter_rejection_message(&err.message);
    if (400..500).contains(&status) && status != 401 && status != 429 && rejected {
        return Error::unsupported_parameter(err.param, err.message);
    }

    match status {
        401 => Error::InvalidApiKey,
        429 => Error::RateLimited { retry_after: None },
        _ => Error::api(
            status,
            err.error_type.unwrap_or_else(|| {
                if code.is_empty() {
                    "api_error".to_string()
                } else {
                    code
                }
            }),
            err.message,
        ),
    }
}

/// Read a failed response into an error
pub(crate) async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error_from_body(status, &body)
}
