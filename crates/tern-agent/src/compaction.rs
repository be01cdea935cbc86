//! Context compression for long conversations
//!
//! When a conversation grows past the configured size, older turns are folded
//! into a running summary by asking the model itself, and only the most recent
//! exchanges stay live. Failure to summarize never loses the live tail.

use tern_ai::InputMessage;

use crate::conversation::{Conversation, Turn, TurnRole};
use crate::retrieval::CompletionClient;

/// Summaries are never capped below this many characters
pub const MIN_SUMMARY_CHARS: usize = 200;

/// Configuration for context compression
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Whether threshold-triggered compression runs at all
    pub enabled: bool,
    /// Fold once the estimated size exceeds this many characters
    pub max_context_chars: usize,
    /// Exchanges (user/assistant pairs) kept verbatim after a fold
    pub keep_turns: usize,
    /// Length hint given to the summarizer
    pub summary_target_words: usize,
    /// Hard cap on the stored summary
    pub summary_max_chars: usize,
    /// Output budgets for summary requests
    pub budgets: Vec<u32>,
    /// Model for summary requests; the conversation's model if unset
    pub model: Option<String>,
    /// Fold each answered exchange into the running summary as it happens
    pub autosummary: bool,
    /// Refresh the running summary every N exchanges
    pub summary_every: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_context_chars: 12_000,
            keep_turns: 8,
            summary_target_words: 120,
            summary_max_chars: 1200,
            budgets: vec![768],
            model: None,
            autosummary: false,
            summary_every: 1,
        }
    }
}

/// Why compression ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionReason {
    /// Size or turn-count threshold crossed
    Threshold,
    /// Explicit /summarize
    Manual,
    /// An exchange was just answered
    Exchange,
}

/// What a compression pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Under threshold, or disabled
    Skipped,
    /// No user/assistant turns to fold
    NothingToFold,
    /// Too little history to fold; the live turns were cut back instead
    Trimmed { dropped: usize },
    /// Older turns folded away; `summary_updated` is false if the summary request failed
    Folded { folded: usize, summary_updated: bool },
    /// The summary request failed and nothing was changed
    Failed { error: String },
    /// The latest exchange was merged into the summary; turns untouched.
    /// `fallback` is true when the summarizer gave nothing and the exchange
    /// was appended verbatim instead.
    Refreshed { fallback: bool },
}

/// Split of the live turns for a fold
struct Partition {
    /// Oldest user/assistant turns, to be summarized
    head: Vec<Turn>,
    /// Most recent user/assistant turns, kept verbatim
    tail: Vec<Turn>,
    /// Out-of-band entries, kept verbatim
    others: Vec<Turn>,
}

// --- Thresholds ---

/// Whether the conversation is past both the size and the turn-count threshold
pub fn needs_compaction(conv: &Conversation, config: &CompactionConfig) -> bool {
    conv.estimated_chars() > config.max_context_chars
        && conv.turns().len() > config.keep_turns * 2 + 2
}

fn partition(conv: &Conversation, keep_turns: usize) -> Partition {
    let pending = conv.has_pending_turn();
    let (conversational, others): (Vec<Turn>, Vec<Turn>) = conv
        .turns()
        .iter()
        .cloned()
        .partition(Turn::is_conversational);

    let len = conversational.len();
    let mut split = len.saturating_sub(keep_turns * 2);
    // Never start the tail on an answer whose question is being folded
    if split > 0
        && split + 1 < len
        && conversational[split].role == TurnRole::Assistant
    {
        split += 1;
    }
    // The unanswered user turn always stays live
    if pending && split == len {
        split = len.saturating_sub(1);
    }

    let mut head = conversational;
    let tail = head.split_off(split);
    Partition { head, tail, others }
}

// --- Transcript Serialization ---

/// Render turns as a plain-text log, one `ROLE: text` line each
fn serialize_turns_for_summary(turns: &[Turn]) -> String {
    turns
        .iter()
        .filter_map(|turn| {
            let content = turn.content.trim();
            if content.is_empty() {
                return None;
            }
            let role = match turn.role {
                TurnRole::User => "USER",
                TurnRole::Assistant => "ASSISTANT",
                TurnRole::System => "SYSTEM",
            };
            Some(format!("{}: {}", role, content))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut a summary down to `max_chars` characters, never below the floor
fn cap_summary(text: &str, max_chars: usize) -> String {
    let limit = max_chars.max(MIN_SUMMARY_CHARS);
    let text = text.trim();
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

// --- Summarization Prompts ---

const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a compression assistant. Given a running chat summary and a new transcript chunk, \
produce a *tight* updated summary that preserves:
- user goals, constraints, preferences
- key facts/definitions/IDs/examples
- decisions made and rationale
- open questions / next steps

Limit to ~{target_words} words, bullet-like prose if helpful. \
No pleasantries, no filler, avoid repetition, keep technical detail that affects answers. \
Do NOT include code unless essential.";

const SUMMARIZATION_PROMPT: &str = "\
CURRENT SUMMARY (may be empty):
{previous_summary}

NEW TRANSCRIPT CHUNK:
{conversation}

Return only the UPDATED SUMMARY.";

const RUNNING_SUMMARY_PROMPT: &str = "\
You maintain a terse running conversation summary for downstream turns.
Keep it under {max_chars} characters. Use short sentences or bullets.
Preserve key decisions, constraints, variables, IDs, URLs, and instructions.
Drop filler, pleasantries, or redundant phrasing.";

/// Summary request for one new exchange
fn build_running_summary_prompt(
    previous_summary: Option<&str>,
    user: &str,
    assistant: &str,
    max_chars: usize,
) -> Vec<InputMessage> {
    let system = RUNNING_SUMMARY_PROMPT.replace("{max_chars}", &max_chars.to_string());
    let previous = previous_summary
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(none)");
    let user = format!(
        "Prior summary:\n{}\n\nNew exchange:\nUser: {}\nAssistant: {}\n\nReturn the updated summary only.",
        previous, user, assistant
    );
    vec![InputMessage::system(system), InputMessage::user(user)]
}

/// Local summary used when the summarizer returns nothing
fn append_exchange(
    previous_summary: Option<&str>,
    user: &str,
    assistant: &str,
    max_chars: usize,
) -> String {
    let exchange = format!("User asked: {} | Ans: {}", user.trim(), assistant.trim());
    let merged = match previous_summary.map(str::trim).filter(|s| !s.is_empty()) {
        Some(previous) => format!("{} {}", previous, exchange),
        None => exchange,
    };
    cap_summary(&merged, max_chars)
}

/// The two-message summary request: instructions, then summary + transcript
fn build_summary_prompt(
    previous_summary: Option<&str>,
    turns: &[Turn],
    target_words: usize,
) -> Vec<InputMessage> {
    let system =
        SUMMARIZATION_SYSTEM_PROMPT.replace("{target_words}", &target_words.to_string());
    let previous = previous_summary
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("(none)");
    let user = SUMMARIZATION_PROMPT
        .replace("{previous_summary}", previous)
        .replace("{conversation}", &serialize_turns_for_summary(turns));
    vec![InputMessage::system(system), InputMessage::user(user)]
}

// --- Main Compaction Functions ---

/// Fold older turns into the summary if the conversation is past threshold.
///
/// If the summary request fails the old summary is kept, but the live turns
/// are still cut back to the tail.
pub async fn compress_if_needed(
    conv: &mut Conversation,
    client: &CompletionClient,
    config: &CompactionConfig,
) -> CompactionOutcome {
    if !config.enabled || !needs_compaction(conv, config) {
        return CompactionOutcome::Skipped;
    }

    let chars_before = conv.estimated_chars();
    let Partition { head, tail, others } = partition(conv, config.keep_turns);

    if head.is_empty() {
        let keep = tail.len().min(config.keep_turns * 2).max(usize::from(conv.has_pending_turn()));
        let trimmed = tail[tail.len() - keep..].to_vec();
        let dropped = conv.turns().len() - trimmed.len();
        conv.replace_turns(trimmed);
        tracing::info!("Nothing to fold; trimmed {} entries", dropped);
        return CompactionOutcome::Trimmed { dropped };
    }

    let folded = head.len();
    let summary_updated = match call_summarization_llm(conv, &head, client, config).await {
        Ok(summary) => {
            conv.replace_summary(&summary);
            true
        }
        Err(e) => {
            tracing::warn!("Summary update failed, keeping the previous summary: {}", e);
            false
        }
    };

    let mut live = others;
    live.extend(tail);
    conv.replace_turns(live);

    tracing::info!(
        "Folded {} turns into the summary ({} -> {} chars)",
        folded,
        chars_before,
        conv.estimated_chars()
    );
    CompactionOutcome::Folded {
        folded,
        summary_updated,
    }
}

/// Whether the running summary is due after `exchanges` answered exchanges
pub fn running_summary_due(exchanges: usize, config: &CompactionConfig) -> bool {
    config.autosummary && exchanges > 0 && exchanges % config.summary_every.max(1) == 0
}

/// Merge the latest answered exchange into the running summary.
///
/// The live turns are kept. If the summarizer gives nothing back, the
/// exchange is appended to the old summary verbatim, so the summary never
/// goes blank once an exchange has happened.
pub async fn update_running_summary(
    conv: &mut Conversation,
    client: &CompletionClient,
    config: &CompactionConfig,
) -> CompactionOutcome {
    let Some((user, assistant)) = conv.last_exchange() else {
        return CompactionOutcome::NothingToFold;
    };
    let (user, assistant) = (user.to_string(), assistant.to_string());

    let prompt = build_running_summary_prompt(
        conv.summary_body(),
        &user,
        &assistant,
        config.summary_max_chars,
    );
    let model = config.model.as_deref().unwrap_or(conv.model());
    let request = client.request(model, prompt);
    let budgets = &config.budgets[..config.budgets.len().min(1)];
    let retrieval = client.complete(&request, budgets).await;

    let (summary, fallback) = match retrieval.placeholder() {
        None => (cap_summary(&retrieval.text, config.summary_max_chars), false),
        Some(reason) => {
            tracing::warn!(
                "Running summary request gave no text ({}); appending the exchange",
                reason
            );
            let merged =
                append_exchange(conv.summary_body(), &user, &assistant, config.summary_max_chars);
            (merged, true)
        }
    };
    conv.refresh_summary(&summary);
    tracing::debug!("Running summary now {} chars", summary.chars().count());
    CompactionOutcome::Refreshed { fallback }
}

/// Fold every user/assistant turn into the summary right now.
///
/// On success the folded turns are removed; on failure nothing changes.
pub async fn summarize_now(
    conv: &mut Conversation,
    client: &CompletionClient,
    config: &CompactionConfig,
) -> CompactionOutcome {
    let (convo, others): (Vec<Turn>, Vec<Turn>) = conv
        .turns()
        .iter()
        .cloned()
        .partition(Turn::is_conversational);

    if convo.is_empty() {
        return CompactionOutcome::NothingToFold;
    }

    match call_summarization_llm(conv, &convo, client, config).await {
        Ok(summary) => {
            conv.replace_summary(&summary);
            conv.replace_turns(others);
            tracing::info!("Folded all {} turns into the summary", convo.len());
            CompactionOutcome::Folded {
                folded: convo.len(),
                summary_updated: true,
            }
        }
        Err(error) => {
            tracing::warn!("Summarize failed: {}", error);
            CompactionOutcome::Failed { error }
        }
    }
}

/// Ask the model for an updated summary covering `turns`
async fn call_summarization_llm(
    conv: &Conversation,
    turns: &[Turn],
    client: &CompletionClient,
    config: &CompactionConfig,
) -> Result<String, String> {
    let prompt = build_summary_prompt(conv.summary_body(), turns, config.summary_target_words);
    let model = config.model.as_deref().unwrap_or(conv.model());
    let request = client.request(model, prompt);

    let retrieval = client.complete(&request, &config.budgets).await;
    match retrieval.placeholder() {
        Some(reason) => Err(format!("summary request failed: {}", reason)),
        None => Ok(cap_summary(&retrieval.text, config.summary_max_chars)),
    }
}
