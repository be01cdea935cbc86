//! Conversation state: base instructions, running summary, turns, active model.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Marker that prefixes the running summary in outbound prompts
pub const SUMMARY_MARKER: &str = "[Dialogue Summary]";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    /// Out-of-band entry (neither side of the dialogue); never folded
    System,
}

/// One entry of the dialogue. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Turn {
    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    /// User or assistant turn
    pub fn is_conversational(&self) -> bool {
        matches!(self.role, TurnRole::User | TurnRole::Assistant)
    }

    /// Size estimate in characters
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// How prior turns reach the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryMode {
    /// Resend every live turn
    #[default]
    Replay,
    /// Resend only the most recent `limit` user turns
    UserTurnsOnly { limit: usize },
    /// Let the service keep history behind `previous_response_id`
    Chained,
}

impl HistoryMode {
    pub fn name(&self) -> &'static str {
        match self {
            HistoryMode::Replay => "replay",
            HistoryMode::UserTurnsOnly { .. } => "users",
            HistoryMode::Chained => "chained",
        }
    }
}

/// The authoritative in-memory record of a dialogue
#[derive(Debug, Clone)]
pub struct Conversation {
    base_instructions: String,
    /// Stored with the marker already applied
    summary: Option<String>,
    turns: Vec<Turn>,
    model: String,
    mode: HistoryMode,
    provider_handle: Option<String>,
}

impl Conversation {
    /// Start an empty conversation
    pub fn new(model: impl Into<String>, base_instructions: impl Into<String>) -> Self {
        Self {
            base_instructions: base_instructions.into(),
            summary: None,
            turns: Vec::new(),
            model: model.into(),
            mode: HistoryMode::Replay,
            provider_handle: None,
        }
    }

    /// Choose how history is sent
    pub fn with_mode(mut self, mode: HistoryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn base_instructions(&self) -> &str {
        &self.base_instructions
    }

    /// The summary as sent, marker included
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// The summary text without its marker
    pub fn summary_body(&self) -> Option<&str> {
        self.summary.as_deref().map(|s| {
            s.strip_prefix(SUMMARY_MARKER)
                .map(|rest| rest.trim_start_matches('\n'))
                .unwrap_or(s)
        })
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn mode(&self) -> HistoryMode {
        self.mode
    }

    /// Server-side chaining handle, only ever held in chained mode
    pub fn provider_handle(&self) -> Option<&str> {
        self.provider_handle.as_deref()
    }

    /// Estimated size: base instructions + summary + every turn, in characters
    pub fn estimated_chars(&self) -> usize {
        self.base_instructions.chars().count()
            + self.summary.as_ref().map_or(0, |s| s.chars().count())
            + self.turns.iter().map(Turn::char_len).sum::<usize>()
    }

    /// Index of the trailing user turn that has no answer yet
    fn pending_index(&self) -> Option<usize> {
        let (idx, turn) = self
            .turns
            .iter()
            .enumerate()
            .rev()
            .find(|(_, t)| t.is_conversational())?;
        (turn.role == TurnRole::User).then_some(idx)
    }

    /// Whether a user turn is awaiting its answer
    pub fn has_pending_turn(&self) -> bool {
        self.pending_index().is_some()
    }

    /// The user turn awaiting its answer
    pub fn pending_turn(&self) -> Option<&Turn> {
        self.pending_index().map(|i| &self.turns[i])
    }

    /// Append a user turn. Fails if one is already awaiting an answer.
    pub fn append_user_turn(&mut self, content: impl Into<String>) -> Result<()> {
        if self.has_pending_turn() {
            return Err(Error::PendingTurn);
        }
        self.turns.push(Turn::user(content));
        Ok(())
    }

    /// Append the answer to the pending user turn
    pub fn append_assistant_turn(&mut self, content: impl Into<String>) -> Result<()> {
        if !self.has_pending_turn() {
            return Err(Error::NoPendingTurn);
        }
        self.turns.push(Turn::assistant(content));
        Ok(())
    }

    /// Record an out-of-band entry
    pub fn push_note(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::system(content));
    }

    /// Roll back the unanswered user turn, if any
    pub fn discard_pending_turn(&mut self) -> Option<Turn> {
        let idx = self.pending_index()?;
        Some(self.turns.remove(idx))
    }

    /// Clear turns and summary together, and forget any server-side chain
    pub fn reset(&mut self) {
        self.turns.clear();
        self.summary = None;
        self.provider_handle = None;
    }

    /// Switch the model used by subsequent requests
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.provider_handle = None;
    }

    /// Replace the base instructions
    pub fn set_base_instructions(&mut self, instructions: impl Into<String>) {
        self.base_instructions = instructions.into();
        self.provider_handle = None;
    }

    /// Remember the reply id to chain the next request from
    pub fn set_provider_handle(&mut self, handle: Option<String>) {
        if self.mode == HistoryMode::Chained {
            self.provider_handle = handle;
        }
    }

    /// Replace the running summary, applying the marker
    pub(crate) fn replace_summary(&mut self, body: &str) {
        self.summary = Some(format!("{}\n{}", SUMMARY_MARKER, body.trim()));
        self.provider_handle = None;
    }

    /// Replace the running summary without touching the live turns.
    ///
    /// The chaining handle survives, since the service still holds every turn.
    pub(crate) fn refresh_summary(&mut self, body: &str) {
        self.summary = Some(format!("{}\n{}", SUMMARY_MARKER, body.trim()));
    }

    /// Replace the live turns after a fold or trim
    pub(crate) fn replace_turns(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
        self.provider_handle = None;
    }

    /// The most recent answered exchange: (user, assistant)
    pub fn last_exchange(&self) -> Option<(&str, &str)> {
        let mut conversational = self.turns.iter().rev().filter(|t| t.is_conversational());
        let assistant = conversational.find(|t| t.role == TurnRole::Assistant)?;
        let user = conversational.find(|t| t.role == TurnRole::User)?;
        Some((user.content.as_str(), assistant.content.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new("gpt-5-mini", "Be concise.")
    }

    #[test]
    fn test_new_conversation_is_empty() {
        let conv = conversation();
        assert!(conv.turns().is_empty());
        assert!(conv.summary().is_none());
        assert_eq!(conv.model(), "gpt-5-mini");
        assert_eq!(conv.mode(), HistoryMode::Replay);
        assert_eq!(conv.estimated_chars(), "Be concise.".len());
    }

    #[test]
    fn test_only_one_pending_user_turn() {
        let mut conv = conversation();
        conv.append_user_turn("2+2?").unwrap();
        assert!(conv.has_pending_turn());
        assert!(matches!(conv.append_user_turn("again"), Err(Error::PendingTurn)));

        conv.append_assistant_turn("4.").unwrap();
        assert!(!conv.has_pending_turn());
        assert!(matches!(conv.append_assistant_turn("extra"), Err(Error::NoPendingTurn)));
        assert_eq!(conv.turns().len(), 2);
    }

    #[test]
    fn test_notes_do_not_hide_pending_turn() {
        let mut conv = conversation();
        conv.append_user_turn("q").unwrap();
        conv.push_note("model switched");
        assert_eq!(conv.pending_turn().map(|t| t.content.as_str()), Some("q"));
        conv.append_assistant_turn("a").unwrap();
        assert_eq!(conv.turns().len(), 3);
    }

    #[test]
    fn test_discard_pending_turn() {
        let mut conv = conversation();
        assert!(conv.discard_pending_turn().is_none());
        conv.append_user_turn("q").unwrap();
        let dropped = conv.discard_pending_turn().unwrap();
        assert_eq!(dropped.content, "q");
        assert!(conv.turns().is_empty());
    }

    #[test]
    fn test_reset_clears_turns_and_summary_together() {
        let mut conv = conversation().with_mode(HistoryMode::Chained);
        conv.append_user_turn("q").unwrap();
        conv.append_assistant_turn("a").unwrap();
        conv.replace_summary("facts");
        conv.set_provider_handle(Some("resp_1".into()));
        conv.reset();
        assert!(conv.turns().is_empty());
        assert!(conv.summary().is_none());
        assert!(conv.provider_handle().is_none());
        assert_eq!(conv.base_instructions(), "Be concise.");
    }

    #[test]
    fn test_summary_marker() {
        let mut conv = conversation();
        conv.replace_summary("  user wants terse answers \n");
        assert_eq!(
            conv.summary(),
            Some("[Dialogue Summary]\nuser wants terse answers")
        );
        assert_eq!(conv.summary_body(), Some("user wants terse answers"));
    }

    #[test]
    fn test_handle_only_kept_in_chained_mode() {
        let mut replay = conversation();
        replay.set_provider_handle(Some("resp_1".into()));
        assert!(replay.provider_handle().is_none());

        let mut chained = conversation().with_mode(HistoryMode::Chained);
        chained.set_provider_handle(Some("resp_1".into()));
        assert_eq!(chained.provider_handle(), Some("resp_1"));
        chained.set_base_instructions("Be verbose.");
        assert!(chained.provider_handle().is_none());

        chained.set_provider_handle(Some("resp_2".into()));
        chained.set_model("gpt-5");
        assert!(chained.provider_handle().is_none());
        assert_eq!(chained.model(), "gpt-5");
    }

    #[test]
    fn test_refresh_summary_keeps_turns_and_handle() {
        let mut conv = conversation().with_mode(HistoryMode::Chained);
        conv.append_user_turn("q").unwrap();
        conv.append_assistant_turn("a").unwrap();
        conv.set_provider_handle(Some("resp_1".into()));
        conv.refresh_summary("user asked q");
        assert_eq!(conv.summary_body(), Some("user asked q"));
        assert_eq!(conv.turns().len(), 2);
        assert_eq!(conv.provider_handle(), Some("resp_1"));
    }

    #[test]
    fn test_estimated_chars_counts_everything() {
        let mut conv = Conversation::new("m", "abc");
        conv.append_user_turn("12345").unwrap();
        conv.append_assistant_turn("é").unwrap();
        conv.replace_summary("xy");
        let summary_len = "[Dialogue Summary]\nxy".chars().count();
        assert_eq!(conv.estimated_chars(), 3 + 5 + 1 + summary_len);
    }

    #[test]
    fn test_last_exchange() {
        let mut conv = conversation();
        assert!(conv.last_exchange().is_none());
        conv.append_user_turn("q1").unwrap();
        conv.append_assistant_turn("a1").unwrap();
        conv.append_user_turn("q2").unwrap();
        assert_eq!(conv.last_exchange(), Some(("q1", "a1")));
        conv.append_assistant_turn("a2").unwrap();
        assert_eq!(conv.last_exchange(), Some(("q2", "a2")));
    }
}
