//! Budget escalation and parameter degradation.
//!
//! A logical request is retried against an ascending list of output budgets.
//! A truncated reply moves to the next budget; a rejected optional field
//! drops to the next parameter tier at the same budget; the first reply with
//! non-empty text wins. The policy lives in [`RetrievalState::next`], a pure
//! transition, so the I/O loop in [`CompletionClient`] only feeds it outcomes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tern_ai::{
    Attempt, Capabilities, CompletionRequest, CompletionService, FaultKind, Input, ParamTier,
    ReasoningEffort, Reply, ResponseEvent, TextAccumulator, Verbosity,
};
use tokio_util::sync::CancellationToken;

/// Default pause between budget escalations
pub const DEFAULT_ESCALATION_DELAY: Duration = Duration::from_millis(100);

/// What one attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Non-empty text
    Text(String),
    /// No text; the output ceiling was hit
    Truncated,
    /// No text for any other reason
    EmptyReply,
    /// The service refused an optional field
    Rejected(String),
    /// Transport or server failure
    Fault(String),
}

impl AttemptOutcome {
    /// Classify a finished reply. Text wins even on an incomplete reply.
    pub fn from_reply(reply: &Reply) -> Self {
        Self::classify(reply.text(), reply)
    }

    fn classify(text: Option<String>, reply: &Reply) -> Self {
        match text {
            Some(text) => AttemptOutcome::Text(text),
            None if reply.is_truncated() => AttemptOutcome::Truncated,
            None => AttemptOutcome::EmptyReply,
        }
    }

    fn from_error(error: &tern_ai::Error) -> Self {
        if error.is_parameter_rejection() {
            AttemptOutcome::Rejected(error.to_string())
        } else {
            AttemptOutcome::Fault(error.to_string())
        }
    }
}

/// Escalation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalState {
    Attempting { budget_index: usize, tier: ParamTier },
    Done(String),
    Exhausted,
}

impl RetrievalState {
    pub fn start(tier: ParamTier) -> Self {
        RetrievalState::Attempting {
            budget_index: 0,
            tier,
        }
    }

    /// Advance on one attempt's outcome. Terminal states stay put.
    pub fn next(self, outcome: AttemptOutcome, budget_count: usize) -> RetrievalState {
        let RetrievalState::Attempting { budget_index, tier } = self else {
            return self;
        };
        let next_budget = |tier| {
            if budget_index + 1 < budget_count {
                RetrievalState::Attempting {
                    budget_index: budget_index + 1,
                    tier,
                }
            } else {
                RetrievalState::Exhausted
            }
        };

        match outcome {
            AttemptOutcome::Text(text) => RetrievalState::Done(text),
            AttemptOutcome::Truncated => next_budget(tier),
            AttemptOutcome::EmptyReply => RetrievalState::Exhausted,
            AttemptOutcome::Rejected(_) => match tier.degrade() {
                Some(lower) => RetrievalState::Attempting {
                    budget_index,
                    tier: lower,
                },
                None => next_budget(tier),
            },
            AttemptOutcome::Fault(_) => next_budget(tier),
        }
    }
}

/// Why a retrieval gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustReason {
    /// The budget list was empty
    NoBudgets,
    /// Every budget was spent before any text appeared
    Truncated,
    /// The service answered without text
    EmptyReply,
    /// The last attempt failed
    Fault(String),
}

/// How a retrieval ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Exhausted(ExhaustReason),
    Cancelled,
}

/// Result of one logical request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    /// The reply text; empty unless `outcome` is `Done`
    pub text: String,
    /// Id of the reply that produced the text
    pub response_id: Option<String>,
    pub outcome: Outcome,
    /// Number of attempts sent
    pub attempts: usize,
}

impl Retrieval {
    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }

    /// The text, or None if the retrieval did not succeed
    pub fn into_text(self) -> Option<String> {
        self.is_done().then_some(self.text)
    }

    /// What to show the user instead of a reply
    pub fn placeholder(&self) -> Option<String> {
        match &self.outcome {
            Outcome::Done => None,
            Outcome::Cancelled => Some("(stream interrupted)".to_string()),
            Outcome::Exhausted(ExhaustReason::Fault(message)) => {
                Some(format!("[error from server: {}]", message))
            }
            Outcome::Exhausted(_) => Some("[no text returned]".to_string()),
        }
    }
}

/// Progress notifications for a streamed retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUpdate<'a> {
    /// A fragment of the current attempt's text
    Delta(&'a str),
    /// A new attempt begins; anything shown so far is superseded
    Restart {
        max_output_tokens: u32,
        reason: RestartReason,
    },
}

/// Why another attempt follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// No text within the previous budget
    Truncated,
    /// An optional field was refused; same budget, fewer fields
    Rejected,
    /// Transport or server failure
    Fault,
}

impl RestartReason {
    fn after(outcome: &AttemptOutcome) -> Option<Self> {
        match outcome {
            AttemptOutcome::Truncated => Some(RestartReason::Truncated),
            AttemptOutcome::Rejected(_) => Some(RestartReason::Rejected),
            AttemptOutcome::Fault(_) => Some(RestartReason::Fault),
            AttemptOutcome::Text(_) | AttemptOutcome::EmptyReply => None,
        }
    }
}

/// Hints applied to every request built by a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_cap: Option<u32>,
    pub verbosity: Option<Verbosity>,
}

/// Runs logical requests against a completion service
pub struct CompletionClient {
    service: Arc<dyn CompletionService>,
    options: RequestOptions,
    /// Most degraded tier the service has forced so far
    learned_tier: Mutex<ParamTier>,
    escalation_delay: Duration,
}

impl CompletionClient {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        let tier = ParamTier::for_capabilities(service.capabilities());
        Self {
            service,
            options: RequestOptions::default(),
            learned_tier: Mutex::new(tier),
            escalation_delay: DEFAULT_ESCALATION_DELAY,
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_escalation_delay(mut self, delay: Duration) -> Self {
        self.escalation_delay = delay;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.service.capabilities()
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    /// Tier the next retrieval starts at
    pub fn starting_tier(&self) -> ParamTier {
        *self.learned_tier.lock()
    }

    fn learn_tier(&self, tier: ParamTier) {
        let mut learned = self.learned_tier.lock();
        if tier > *learned {
            tracing::info!("Service rejected optional fields; using {} parameters from now on", tier);
            *learned = tier;
        }
    }

    /// Build a request carrying this client's hints
    pub fn request(&self, model: &str, input: impl Into<Input>) -> CompletionRequest {
        CompletionRequest::new(model, input)
            .with_reasoning_effort(self.options.reasoning_effort)
            .with_reasoning_cap(self.options.reasoning_cap)
            .with_verbosity(self.options.verbosity)
    }

    /// Feed one outcome to the state machine, with logging and tier learning
    async fn advance(
        &self,
        state: RetrievalState,
        outcome: AttemptOutcome,
        budgets: &[u32],
        reason: &mut ExhaustReason,
    ) -> RetrievalState {
        match &outcome {
            AttemptOutcome::Truncated => *reason = ExhaustReason::Truncated,
            AttemptOutcome::EmptyReply => *reason = ExhaustReason::EmptyReply,
            AttemptOutcome::Rejected(m) | AttemptOutcome::Fault(m) => {
                *reason = ExhaustReason::Fault(m.clone())
            }
            AttemptOutcome::Text(_) => {}
        }

        let previous = state.clone();
        let next = state.next(outcome, budgets.len());

        if let (
            RetrievalState::Attempting {
                budget_index: from,
                tier: from_tier,
            },
            RetrievalState::Attempting {
                budget_index: to,
                tier: to_tier,
            },
        ) = (&previous, &next)
        {
            if to_tier != from_tier {
                tracing::debug!("Parameter rejected; retrying with {} tier", to_tier);
                self.learn_tier(*to_tier);
            }
            if to != from {
                tracing::debug!(
                    "No text within {} tokens; escalating to {}",
                    budgets[*from],
                    budgets[*to]
                );
                if !self.escalation_delay.is_zero() {
                    tokio::time::sleep(self.escalation_delay).await;
                }
            }
        }
        next
    }

    /// Run one logical request, escalating through `budgets`
    pub async fn complete(&self, request: &CompletionRequest, budgets: &[u32]) -> Retrieval {
        if budgets.is_empty() {
            return exhausted(ExhaustReason::NoBudgets, 0);
        }

        let mut state = RetrievalState::start(self.starting_tier());
        let mut reason = ExhaustReason::EmptyReply;
        let mut response_id = None;
        let mut attempts = 0;

        loop {
            state = match state {
                RetrievalState::Attempting { budget_index, tier } => {
                    let attempt = Attempt {
                        max_output_tokens: budgets[budget_index],
                        tier,
                    };
                    attempts += 1;
                    let outcome = match self.service.create(request, attempt).await {
                        Ok(reply) => {
                            log_usage(&reply, attempt);
                            response_id = reply.id().map(str::to_string);
                            AttemptOutcome::from_reply(&reply)
                        }
                        Err(e) => {
                            tracing::warn!("Attempt at {} tokens failed: {}", attempt.max_output_tokens, e);
                            AttemptOutcome::from_error(&e)
                        }
                    };
                    self.advance(state, outcome, budgets, &mut reason).await
                }
                RetrievalState::Done(text) => {
                    return Retrieval {
                        text,
                        response_id,
                        outcome: Outcome::Done,
                        attempts,
                    };
                }
                RetrievalState::Exhausted => return exhausted(reason, attempts),
            };
        }
    }

    /// Like [`complete`](Self::complete), surfacing text as it arrives.
    ///
    /// Cancelling `cancel` abandons the in-flight attempt and stops escalation.
    pub async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        budgets: &[u32],
        on_update: &mut (dyn FnMut(StreamUpdate<'_>) + Send),
        cancel: &CancellationToken,
    ) -> Retrieval {
        if budgets.is_empty() {
            return exhausted(ExhaustReason::NoBudgets, 0);
        }

        let mut state = RetrievalState::start(self.starting_tier());
        let mut reason = ExhaustReason::EmptyReply;
        let mut response_id = None;
        let mut attempts = 0;
        let mut restart = None;

        loop {
            state = match state {
                RetrievalState::Attempting { budget_index, tier } => {
                    if cancel.is_cancelled() {
                        return cancelled(attempts);
                    }
                    let attempt = Attempt {
                        max_output_tokens: budgets[budget_index],
                        tier,
                    };
                    if let Some(reason) = restart.take() {
                        on_update(StreamUpdate::Restart {
                            max_output_tokens: attempt.max_output_tokens,
                            reason,
                        });
                    }
                    attempts += 1;

                    let opened = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return cancelled(attempts),
                        opened = self.service.stream(request, attempt) => opened,
                    };
                    let outcome = match opened {
                        Err(e) => {
                            tracing::warn!("Attempt at {} tokens failed: {}", attempt.max_output_tokens, e);
                            AttemptOutcome::from_error(&e)
                        }
                        Ok(mut events) => {
                            let mut acc = TextAccumulator::new();
                            loop {
                                let event = tokio::select! {
                                    biased;
                                    _ = cancel.cancelled() => return cancelled(attempts),
                                    event = events.next() => event,
                                };
                                match event {
                                    Some(ResponseEvent::TextDelta { delta }) => {
                                        acc.push(&delta);
                                        on_update(StreamUpdate::Delta(&delta));
                                    }
                                    Some(ResponseEvent::Done { reply }) => {
                                        log_usage(&reply, attempt);
                                        response_id = reply.id().map(str::to_string);
                                        // What the user saw takes precedence over the final payload
                                        let text = acc.finish().or_else(|| reply.text());
                                        break AttemptOutcome::classify(text, &reply);
                                    }
                                    Some(ResponseEvent::Error { kind, message }) => {
                                        tracing::warn!("Stream at {} tokens failed: {}", attempt.max_output_tokens, message);
                                        break match kind {
                                            FaultKind::UnsupportedParameter => {
                                                AttemptOutcome::Rejected(message)
                                            }
                                            FaultKind::Transport => AttemptOutcome::Fault(message),
                                        };
                                    }
                                    None => {
                                        break AttemptOutcome::Fault(
                                            "stream closed without a final reply".to_string(),
                                        );
                                    }
                                }
                            }
                        }
                    };
                    restart = RestartReason::after(&outcome);
                    self.advance(state, outcome, budgets, &mut reason).await
                }
                RetrievalState::Done(text) => {
                    return Retrieval {
                        text,
                        response_id,
                        outcome: Outcome::Done,
                        attempts,
                    };
                }
                RetrievalState::Exhausted => return exhausted(reason, attempts),
            };
        }
    }
}

fn exhausted(reason: ExhaustReason, attempts: usize) -> Retrieval {
    tracing::debug!("Retrieval exhausted after {} attempts: {:?}", attempts, reason);
    Retrieval {
        text: String::new(),
        response_id: None,
        outcome: Outcome::Exhausted(reason),
        attempts,
    }
}

fn cancelled(attempts: usize) -> Retrieval {
    tracing::debug!("Retrieval cancelled after {} attempts", attempts);
    Retrieval {
        text: String::new(),
        response_id: None,
        outcome: Outcome::Cancelled,
        attempts,
    }
}

fn log_usage(reply: &Reply, attempt: Attempt) {
    let usage = reply.usage();
    tracing::debug!(
        "Reply status={} budget={} tier={} input_tokens={} output_tokens={} reasoning_tokens={}",
        reply.status().unwrap_or("?"),
        attempt.max_output_tokens,
        attempt.tier,
        usage.input_tokens,
        usage.output_tokens,
        usage.reasoning_tokens
    );
}
