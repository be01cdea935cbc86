//! One-line accuracy verdicts for the last exchange

use tern_ai::{InputMessage, Verbosity};

use crate::retrieval::{CompletionClient, RequestOptions};

const EVALUATOR_PROMPT: &str = "\
You are an evaluator. Given the USER's prompt and the ASSISTANT's reply, \
decide if the reply is accurate and correct. Respond with EXACTLY:
Yes — <short one-line justification>
or
No — <short one-line justification>
Requirements: Start with 'Yes' or 'No'. Keep total under ~20 tokens.";

/// Verifier settings
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub model: String,
    pub budgets: Vec<u32>,
    pub reasoning_cap: Option<u32>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".to_string(),
            budgets: vec![256, 512, 1024],
            reasoning_cap: Some(64),
        }
    }
}

/// Asks a model whether an answer was accurate
pub struct Verifier {
    client: CompletionClient,
    config: VerifierConfig,
}

impl Verifier {
    /// Wrap `client`; its hints are replaced with low verbosity and the configured cap
    pub fn new(client: CompletionClient, config: VerifierConfig) -> Self {
        let client = client.with_options(RequestOptions {
            reasoning_effort: None,
            reasoning_cap: config.reasoning_cap,
            verbosity: Some(Verbosity::Low),
        });
        Self { client, config }
    }

    /// Verdict on `answer` as a reply to `question`, or None if none came back
    pub async fn check(&self, question: &str, answer: &str) -> Option<String> {
        let input = vec![
            InputMessage::system(EVALUATOR_PROMPT),
            InputMessage::user(format!(
                "USER PROMPT:\n{}\n\nASSISTANT REPLY:\n{}\n\nWas it accurate?",
                question, answer
            )),
        ];
        let request = self.client.request(&self.config.model, input);
        let retrieval = self.client.complete(&request, &self.config.budgets).await;
        if let Some(reason) = retrieval.placeholder() {
            tracing::debug!("Accuracy check gave no verdict: {}", reason);
        }
        retrieval.into_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedService, text_reply, truncated_reply};
    use std::sync::Arc;
    use std::time::Duration;
    use tern_ai::{Capabilities, Input};

    fn verifier(service: &Arc<ScriptedService>) -> Verifier {
        let client = CompletionClient::new(service.clone()).with_escalation_delay(Duration::ZERO);
        Verifier::new(client, VerifierConfig::default())
    }

    #[tokio::test]
    async fn test_check_returns_verdict() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.reply(text_reply("resp_c", "Yes — 2+2 is 4."));

        let verdict = verifier(&service).check("2+2?", "4.").await;

        assert_eq!(verdict.as_deref(), Some("Yes — 2+2 is 4."));
        let (request, attempt) = &service.calls()[0];
        assert_eq!(request.model, "gpt-5-mini");
        assert_eq!(request.reasoning_cap, Some(64));
        assert_eq!(request.verbosity, Some(Verbosity::Low));
        assert_eq!(attempt.max_output_tokens, 256);
        let Input::Messages(messages) = &request.input else {
            panic!("expected message input");
        };
        assert!(messages[1].content.contains("USER PROMPT:\n2+2?"));
        assert!(messages[1].content.contains("ASSISTANT REPLY:\n4."));
    }

    #[tokio::test]
    async fn test_check_escalates_then_gives_up() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        for _ in 0..3 {
            service.reply(truncated_reply());
        }

        let verdict = verifier(&service).check("q", "a").await;

        assert!(verdict.is_none());
        let budgets: Vec<u32> = service.attempts().iter().map(|a| a.max_output_tokens).collect();
        assert_eq!(budgets, vec![256, 512, 1024]);
    }
}
