//! /session command - show session info

use super::CommandResult;
use crate::utils::truncate_chars;
use tern_agent::{Conversation, TurnRole};
use tern_ai::{Api, ParamTier};

/// Session facts that live outside the conversation
#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    pub api: Api,
    pub tier: ParamTier,
    pub stream: bool,
}

pub struct SessionCommand;

impl SessionCommand {
    pub fn execute(conversation: &Conversation, info: &SessionInfo) -> CommandResult {
        let mut output = String::from("Session Info\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');

        output.push_str(&format!(
            "Model:      {} ({} api)\n",
            conversation.model(),
            info.api.name()
        ));
        output.push_str(&format!("History:    {}\n", conversation.mode().name()));
        output.push_str(&format!("Parameters: {}\n", info.tier));
        output.push_str(&format!(
            "Streaming:  {}\n",
            if info.stream { "on" } else { "off" }
        ));
        output.push('\n');

        let turns = conversation.turns();
        let user = turns.iter().filter(|t| t.role == TurnRole::User).count();
        let assistant = turns
            .iter()
            .filter(|t| t.role == TurnRole::Assistant)
            .count();
        output.push_str(&format!("Turns:      {} live\n", turns.len()));
        output.push_str(&format!(
            "            {} user, {} assistant, {} notes\n",
            user,
            assistant,
            turns.len() - user - assistant
        ));
        output.push_str(&format!(
            "Context:    ~{} chars\n",
            format_number(conversation.estimated_chars())
        ));
        output.push_str(&format!(
            "Summary:    {}\n",
            match conversation.summary_body() {
                Some(body) => format!("{} chars", body.chars().count()),
                None => "none".to_string(),
            }
        ));
        if let Some(handle) = conversation.provider_handle() {
            output.push_str(&format!("Chained to: {}\n", truncate_chars(handle, 32)));
        }

        CommandResult::Message(output)
    }
}

fn format_number(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(12_000), "12.0k");
        assert_eq!(format_number(2_500_000), "2.5M");
    }

    #[test]
    fn test_counts_turns() {
        let mut conv = Conversation::new("gpt-5-mini", "");
        conv.append_user_turn("hi").unwrap();
        conv.append_assistant_turn("hello").unwrap();
        conv.push_note("note");
        let info = SessionInfo {
            api: Api::ChatCompletions,
            tier: ParamTier::Minimal,
            stream: true,
        };
        let CommandResult::Message(msg) = SessionCommand::execute(&conv, &info) else {
            panic!("expected a message");
        };
        assert!(msg.contains("3 live"));
        assert!(msg.contains("1 user, 1 assistant, 1 notes"));
        assert!(msg.contains("chat api"));
        assert!(msg.contains("Parameters: minimal"));
        assert!(msg.contains("Summary:    none"));
    }
}
