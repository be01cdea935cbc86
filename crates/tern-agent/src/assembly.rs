//! Turn a conversation into the input of the next request.
//!
//! Assembly is a pure function of the conversation: base instructions and
//! the running summary go first as system entries, then whatever slice of
//! the live turns the history mode sends.

use tern_ai::InputMessage;

use crate::conversation::{Conversation, HistoryMode, Turn, TurnRole};

/// Request input plus the chaining handle to send with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub input: Vec<InputMessage>,
    pub previous_response_id: Option<String>,
}

fn to_input(turn: &Turn) -> InputMessage {
    match turn.role {
        TurnRole::User => InputMessage::user(turn.content.clone()),
        TurnRole::Assistant => InputMessage::assistant(turn.content.clone()),
        TurnRole::System => InputMessage::system(turn.content.clone()),
    }
}

fn preamble(conv: &Conversation) -> Vec<InputMessage> {
    let mut input = Vec::new();
    if !conv.base_instructions().trim().is_empty() {
        input.push(InputMessage::system(conv.base_instructions()));
    }
    if let Some(summary) = conv.summary() {
        input.push(InputMessage::system(summary));
    }
    input
}

/// Build the input for the next request
pub fn assemble(conv: &Conversation) -> Assembled {
    // With a live chain the service already holds everything but the new turn
    if conv.mode() == HistoryMode::Chained {
        if let (Some(handle), Some(pending)) = (conv.provider_handle(), conv.pending_turn()) {
            return Assembled {
                input: vec![to_input(pending)],
                previous_response_id: Some(handle.to_string()),
            };
        }
    }

    let mut input = preamble(conv);
    match conv.mode() {
        HistoryMode::Replay | HistoryMode::Chained => {
            input.extend(conv.turns().iter().map(to_input));
        }
        HistoryMode::UserTurnsOnly { limit } => {
            let users: Vec<&Turn> = conv
                .turns()
                .iter()
                .filter(|t| t.role == TurnRole::User)
                .collect();
            // The pending turn always goes out; `limit` bounds the earlier ones
            let (earlier, pending) = match conv.pending_turn() {
                Some(_) => users.split_at(users.len().saturating_sub(1)),
                None => (users.as_slice(), &[][..]),
            };
            let skip = earlier.len().saturating_sub(limit);
            input.extend(earlier[skip..].iter().chain(pending).map(|t| to_input(t)));
        }
    }

    Assembled {
        input,
        previous_response_id: None,
    }
}
