//! Per-turn cycle: append, compress, complete, commit

use tokio_util::sync::CancellationToken;

use crate::{
    assembly::assemble,
    compaction::{self, CompactionConfig, CompactionOutcome, CompactionReason},
    conversation::{Conversation, HistoryMode},
    error::Result,
    events::SessionEvent,
    retrieval::{CompletionClient, Outcome, Retrieval, StreamUpdate},
};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ascending output budgets for answers
    pub budgets: Vec<u32>,
    /// Stream answers as they are generated
    pub stream: bool,
    /// Context compression configuration
    pub compaction: CompactionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            budgets: vec![768, 1536],
            stream: false,
            compaction: CompactionConfig::default(),
        }
    }
}

/// How a submitted turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was committed to the conversation
    Answered(String),
    /// No usable reply; the user turn was rolled back
    Failed { placeholder: String },
    /// Interrupted; the user turn was rolled back
    Cancelled,
}

impl TurnOutcome {
    /// Text to show for this turn
    pub fn display_text(&self) -> &str {
        match self {
            TurnOutcome::Answered(text) => text,
            TurnOutcome::Failed { placeholder } => placeholder,
            TurnOutcome::Cancelled => "(stream interrupted)",
        }
    }
}

/// Drives one conversation against one completion client
pub struct Session {
    conversation: Conversation,
    client: CompletionClient,
    config: SessionConfig,
    /// Answered exchanges since start or the last reset
    exchanges: usize,
}

impl Session {
    /// Create a session. Chained history needs server-side chaining; without it
    /// the conversation falls back to replay.
    pub fn new(conversation: Conversation, client: CompletionClient, config: SessionConfig) -> Self {
        let conversation = if conversation.mode() == HistoryMode::Chained
            && !client.capabilities().server_chaining
        {
            tracing::warn!("Endpoint cannot chain responses; replaying history instead");
            conversation.with_mode(HistoryMode::Replay)
        } else {
            conversation
        };
        Self {
            conversation,
            client,
            config,
            exchanges: 0,
        }
    }

    /// Get the conversation
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Get the session config
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client(&self) -> &CompletionClient {
        &self.client
    }

    /// Turn streaming on or off
    pub fn set_stream(&mut self, stream: bool) {
        self.config.stream = stream;
    }

    /// The running summary, marker included
    pub fn summary(&self) -> Option<&str> {
        self.conversation.summary()
    }

    /// Clear history and summary; base instructions and model stay
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.exchanges = 0;
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.conversation.set_model(model);
    }

    pub fn set_base_instructions(&mut self, instructions: impl Into<String>) {
        self.conversation.set_base_instructions(instructions);
    }

    /// Fold every turn into the summary now
    pub async fn summarize_now(
        &mut self,
        on_event: &mut (dyn FnMut(SessionEvent) + Send),
    ) -> CompactionOutcome {
        let reason = CompactionReason::Manual;
        on_event(SessionEvent::CompactionStart { reason });
        let outcome =
            compaction::summarize_now(&mut self.conversation, &self.client, &self.config.compaction)
                .await;
        on_event(SessionEvent::CompactionEnd {
            reason,
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn refresh_running_summary(&mut self, on_event: &mut (dyn FnMut(SessionEvent) + Send)) {
        let config = &self.config.compaction;
        if !compaction::running_summary_due(self.exchanges, config) {
            return;
        }
        let reason = CompactionReason::Exchange;
        on_event(SessionEvent::CompactionStart { reason });
        let outcome =
            compaction::update_running_summary(&mut self.conversation, &self.client, config).await;
        on_event(SessionEvent::CompactionEnd { reason, outcome });
    }

    async fn compress(&mut self, on_event: &mut (dyn FnMut(SessionEvent) + Send)) {
        let config = &self.config.compaction;
        if !config.enabled || !compaction::needs_compaction(&self.conversation, config) {
            return;
        }
        let reason = CompactionReason::Threshold;
        on_event(SessionEvent::CompactionStart { reason });
        let outcome =
            compaction::compress_if_needed(&mut self.conversation, &self.client, config).await;
        on_event(SessionEvent::CompactionEnd { reason, outcome });
    }

    /// Submit one user turn and wait for its answer.
    ///
    /// Only fails if a user turn is already pending; every service failure
    /// comes back as a [`TurnOutcome`] with the user turn rolled back.
    pub async fn submit(
        &mut self,
        text: &str,
        on_event: &mut (dyn FnMut(SessionEvent) + Send),
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        self.conversation.append_user_turn(text)?;
        self.compress(on_event).await;

        let assembled = assemble(&self.conversation);
        let request = self
            .client
            .request(self.conversation.model(), assembled.input)
            .with_previous_response_id(assembled.previous_response_id);
        tracing::debug!(
            "Turn request: model={} entries={} chars={} chained={}",
            request.model,
            request.input.to_messages().len(),
            request.input.char_len(),
            request.previous_response_id.is_some()
        );

        let budgets = &self.config.budgets;
        let retrieval = if self.config.stream {
            let mut forward = |update: StreamUpdate<'_>| match update {
                StreamUpdate::Delta(delta) => on_event(SessionEvent::TextDelta {
                    delta: delta.to_string(),
                }),
                StreamUpdate::Restart {
                    max_output_tokens,
                    reason,
                } => on_event(SessionEvent::AttemptRestart {
                    max_output_tokens,
                    reason,
                }),
            };
            self.client
                .complete_streaming(&request, budgets, &mut forward, cancel)
                .await
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Retrieval {
                    text: String::new(),
                    response_id: None,
                    outcome: Outcome::Cancelled,
                    attempts: 0,
                },
                retrieval = self.client.complete(&request, budgets) => retrieval,
            }
        };

        if retrieval.is_done() {
            self.conversation.append_assistant_turn(retrieval.text.clone())?;
            self.conversation.set_provider_handle(retrieval.response_id);
            self.exchanges += 1;
            self.refresh_running_summary(on_event).await;
            self.compress(on_event).await;
            return Ok(TurnOutcome::Answered(retrieval.text));
        }

        self.conversation.discard_pending_turn();
        if retrieval.outcome == Outcome::Cancelled {
            return Ok(TurnOutcome::Cancelled);
        }
        let placeholder = retrieval
            .placeholder()
            .unwrap_or_else(|| "[no text returned]".to_string());
        Ok(TurnOutcome::Failed { placeholder })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedService, Step, text_reply, truncated_reply};
    use std::sync::Arc;
    use std::time::Duration;
    use tern_ai::{Capabilities, Input, InputMessage, ResponseEvent, Role};

    fn session(service: &Arc<ScriptedService>, mode: HistoryMode, config: SessionConfig) -> Session {
        let client = CompletionClient::new(service.clone()).with_escalation_delay(Duration::ZERO);
        let conversation = Conversation::new("gpt-5-mini", "Be concise.").with_mode(mode);
        Session::new(conversation, client, config)
    }

    fn messages(input: &Input) -> Vec<InputMessage> {
        input.to_messages()
    }

    async fn submit(session: &mut Session, text: &str) -> TurnOutcome {
        session
            .submit(text, &mut |_| {}, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_exchange_is_committed() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.reply(text_reply("resp_1", "4."));
        let mut session = session(&service, HistoryMode::Replay, SessionConfig::default());

        let outcome = submit(&mut session, "2+2?").await;

        assert_eq!(outcome, TurnOutcome::Answered("4.".into()));
        let turns = session.conversation().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "2+2?");
        assert_eq!(turns[1].content, "4.");
        assert!(session.summary().is_none());

        let sent = messages(&service.calls()[0].0.input);
        assert_eq!(
            sent,
            vec![InputMessage::system("Be concise."), InputMessage::user("2+2?")]
        );
    }

    #[tokio::test]
    async fn test_exhausted_turn_is_rolled_back() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.reply(truncated_reply()).reply(truncated_reply());
        let mut session = session(&service, HistoryMode::Replay, SessionConfig::default());

        let outcome = submit(&mut session, "write an essay").await;

        assert_eq!(
            outcome,
            TurnOutcome::Failed {
                placeholder: "[no text returned]".into()
            }
        );
        assert!(session.conversation().turns().is_empty());
        let budgets: Vec<u32> = service.attempts().iter().map(|a| a.max_output_tokens).collect();
        assert_eq!(budgets, vec![768, 1536]);
    }

    #[tokio::test]
    async fn test_server_error_placeholder() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service
            .fail(tern_ai::Error::api(500, "server_error", "boom"))
            .fail(tern_ai::Error::api(500, "server_error", "still down"));
        let mut session = session(&service, HistoryMode::Replay, SessionConfig::default());

        let outcome = submit(&mut session, "hi").await;

        assert!(outcome.display_text().starts_with("[error from server:"));
        assert!(session.conversation().turns().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_stream_is_rolled_back() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.push(Step::Events {
            events: vec![ResponseEvent::TextDelta { delta: "Once".into() }],
            hang: true,
        });
        let config = SessionConfig {
            stream: true,
            ..Default::default()
        };
        let mut session = session(&service, HistoryMode::Replay, config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let mut deltas = Vec::new();

        let outcome = session
            .submit(
                "tell me a story",
                &mut |event| {
                    if let SessionEvent::TextDelta { delta } = event {
                        deltas.push(delta);
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(deltas, vec!["Once".to_string()]);
        assert!(session.conversation().turns().is_empty());
    }

    #[tokio::test]
    async fn test_streamed_answer_is_committed() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.reply(text_reply("resp_1", "streamed"));
        let config = SessionConfig {
            stream: true,
            ..Default::default()
        };
        let mut session = session(&service, HistoryMode::Replay, config);
        let mut seen = String::new();

        let outcome = session
            .submit(
                "go",
                &mut |event| {
                    if let SessionEvent::TextDelta { delta } = event {
                        seen.push_str(&delta);
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Answered("streamed".into()));
        assert_eq!(seen, "streamed");
        assert_eq!(session.conversation().turns().len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_fold_across_exchanges() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service
            .reply(text_reply("r1", "answer 1"))
            .reply(text_reply("r2", "answer 2"))
            .reply(text_reply("rs", "- asked two questions"))
            .reply(text_reply("r3", "answer 3"));
        let config = SessionConfig {
            compaction: CompactionConfig {
                max_context_chars: 10,
                keep_turns: 1,
                budgets: vec![256],
                ..Default::default()
            },
            ..Default::default()
        };
        let mut session = session(&service, HistoryMode::Replay, config);
        let mut events = Vec::new();

        for q in ["question 1", "question 2", "question 3"] {
            session
                .submit(q, &mut |e| events.push(e), &CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(
            session.summary(),
            Some("[Dialogue Summary]\n- asked two questions")
        );
        let turns = session.conversation().turns();
        assert!(turns.len() <= 2);
        assert_eq!(turns.last().map(|t| t.content.as_str()), Some("answer 3"));
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::CompactionEnd {
                outcome: CompactionOutcome::Folded {
                    summary_updated: true,
                    ..
                },
                ..
            }
        )));

        // The answer request after the fold carries the summary, not the folded turns
        let last = messages(&service.calls()[3].0.input);
        assert_eq!(last[1].role, Role::System);
        assert!(last[1].content.starts_with("[Dialogue Summary]"));
        assert!(last.iter().all(|m| m.content != "question 1"));
    }

    #[tokio::test]
    async fn test_chained_mode_sends_only_new_turn() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service
            .reply(text_reply("resp_1", "first"))
            .reply(text_reply("resp_2", "second"));
        let mut session = session(&service, HistoryMode::Chained, SessionConfig::default());

        submit(&mut session, "one").await;
        submit(&mut session, "two").await;

        let calls = service.calls();
        assert!(calls[0].0.previous_response_id.is_none());
        assert_eq!(calls[1].0.previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(messages(&calls[1].0.input), vec![InputMessage::user("two")]);
        assert_eq!(session.conversation().provider_handle(), Some("resp_2"));
        assert_eq!(session.conversation().turns().len(), 4);
    }

    #[tokio::test]
    async fn test_chained_falls_back_without_server_chaining() {
        let service = Arc::new(ScriptedService::new(Capabilities::NONE));
        let session = session(&service, HistoryMode::Chained, SessionConfig::default());
        assert_eq!(session.conversation().mode(), HistoryMode::Replay);
    }

    #[tokio::test]
    async fn test_pending_turn_is_an_error() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        let mut session = session(&service, HistoryMode::Replay, SessionConfig::default());
        session.conversation.append_user_turn("dangling").unwrap();

        let result = session
            .submit("again", &mut |_| {}, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(crate::Error::PendingTurn)));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reset_and_setters() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.reply(text_reply("r1", "hi"));
        let mut session = session(&service, HistoryMode::Replay, SessionConfig::default());
        submit(&mut session, "hello").await;

        session.set_model("gpt-5");
        session.set_base_instructions("Answer in French.");
        session.reset();

        let conv = session.conversation();
        assert!(conv.turns().is_empty());
        assert_eq!(conv.model(), "gpt-5");
        assert_eq!(conv.base_instructions(), "Answer in French.");
    }

    #[tokio::test]
    async fn test_summarize_now_through_session() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service
            .reply(text_reply("r1", "Paris"))
            .reply(text_reply("rs", "- capital of France is Paris"));
        let mut session = session(&service, HistoryMode::Replay, SessionConfig::default());
        submit(&mut session, "capital of France?").await;

        let mut events = Vec::new();
        let outcome = session.summarize_now(&mut |e| events.push(e)).await;

        assert!(matches!(outcome, CompactionOutcome::Folded { folded: 2, .. }));
        assert_eq!(
            events[0],
            SessionEvent::CompactionStart {
                reason: CompactionReason::Manual
            }
        );
        assert!(matches!(
            events[1],
            SessionEvent::CompactionEnd {
                reason: CompactionReason::Manual,
                ..
            }
        ));
        assert!(session.conversation().turns().is_empty());
        assert_eq!(
            session.conversation().summary_body(),
            Some("- capital of France is Paris")
        );
    }

    fn users_mode_config() -> SessionConfig {
        SessionConfig {
            compaction: CompactionConfig {
                autosummary: true,
                budgets: vec![256],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_user_turns_mode_remembers_answers() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service
            .reply(text_reply("r1", "Your order id is ZX-991."))
            .reply(text_reply("rs", "- user's order id is ZX-991"))
            .reply(text_reply("r2", "It was ZX-991."));
        let mode = HistoryMode::UserTurnsOnly { limit: 10 };
        let mut session = session(&service, mode, users_mode_config());
        let mut events = Vec::new();

        for q in ["look up my order", "what was my order id?"] {
            session
                .submit(q, &mut |e| events.push(e), &CancellationToken::new())
                .await
                .unwrap();
        }

        let calls = service.calls();
        assert_eq!(calls.len(), 4);
        // The summary request sees the first exchange
        let fold = messages(&calls[1].0.input);
        assert!(fold[1].content.contains("Assistant: Your order id is ZX-991."));
        // The second answer request carries it as a system entry
        let second = messages(&calls[2].0.input);
        assert!(
            second
                .iter()
                .any(|m| m.role == Role::System && m.content.contains("ZX-991"))
        );
        assert_eq!(
            second.last(),
            Some(&InputMessage::user("what was my order id?"))
        );
        // Turns survive the refresh
        assert_eq!(session.conversation().turns().len(), 4);
        assert!(events.contains(&SessionEvent::CompactionStart {
            reason: CompactionReason::Exchange
        }));
    }

    #[tokio::test]
    async fn test_user_turns_mode_local_summary_on_failure() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service
            .reply(text_reply("r1", "Your order id is ZX-991."))
            .fail(tern_ai::Error::api(500, "server_error", "down"))
            .reply(text_reply("r2", "It was ZX-991."));
        let mode = HistoryMode::UserTurnsOnly { limit: 10 };
        let mut session = session(&service, mode, users_mode_config());

        submit(&mut session, "look up my order").await;

        assert_eq!(
            session.conversation().summary_body(),
            Some("User asked: look up my order | Ans: Your order id is ZX-991.")
        );
        submit(&mut session, "what was my order id?").await;
        let second = messages(&service.calls()[2].0.input);
        assert!(second.iter().any(|m| m.content.contains("Ans: Your order id")));
    }

    #[tokio::test]
    async fn test_autosummary_off_by_default() {
        let service = Arc::new(ScriptedService::new(Capabilities::ALL));
        service.reply(text_reply("r1", "Your order id is ZX-991."));
        let mode = HistoryMode::UserTurnsOnly { limit: 10 };
        let mut session = session(&service, mode, SessionConfig::default());

        submit(&mut session, "look up my order").await;

        assert_eq!(service.calls().len(), 1);
        assert!(session.summary().is_none());
    }
}
