//! Slash commands for interactive mode

mod model;
mod session;

pub use model::ModelCommand;
pub use session::{SessionCommand, SessionInfo};

use tern_agent::Conversation;

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Exit the application
    Exit,
    /// Clear history and summary
    Reset,
    /// Change the model
    ChangeModel(String),
    /// Replace the base instructions
    SetInstructions(String),
    /// Fold the whole history into the summary now
    Summarize,
    /// Verify the last answer
    Check,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(
    input: &str,
    conversation: &Conversation,
    info: &SessionInfo,
) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, char::is_whitespace).collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "reset" => CommandResult::Reset,

        "model" | "m" => ModelCommand::execute(args, conversation.model()),

        "system" => {
            if args.is_empty() {
                CommandResult::Message(format!(
                    "Current instructions:\n{}\n\nReplace with: /system <text>",
                    conversation.base_instructions()
                ))
            } else {
                CommandResult::SetInstructions(args.to_string())
            }
        }

        "summary" => CommandResult::Message(
            conversation
                .summary_body()
                .map(|s| format!("[summary]\n{}", s))
                .unwrap_or_else(|| "[no summary yet]".to_string()),
        ),

        "summarize" => CommandResult::Summarize,

        "check" => CommandResult::Check,

        "session" | "s" => SessionCommand::execute(conversation, info),

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /model, /m [name]    Show or switch the model
  /system [text]       Show or replace the base instructions
  /summary             Show the running summary
  /summarize           Fold the conversation into the summary now
  /check               Ask a second model whether the last answer was accurate
  /session, /s         Show session info
  /reset               Clear history and summary
  /quit, /exit, /q     Exit tern

Ctrl-C interrupts an answer in progress."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_agent::HistoryMode;
    use tern_ai::{Api, ParamTier};

    fn info() -> SessionInfo {
        SessionInfo {
            api: Api::Responses,
            tier: ParamTier::Full,
            stream: false,
        }
    }

    fn run(input: &str, conversation: &Conversation) -> Option<CommandResult> {
        execute_command(input, conversation, &info())
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        let conv = Conversation::new("gpt-5-mini", "Be concise.");
        assert_eq!(run("hello", &conv), None);
    }

    #[test]
    fn test_basic_commands() {
        let conv = Conversation::new("gpt-5-mini", "Be concise.");
        assert_eq!(run("/quit", &conv), Some(CommandResult::Exit));
        assert_eq!(run("/EXIT", &conv), Some(CommandResult::Exit));
        assert_eq!(run("/reset", &conv), Some(CommandResult::Reset));
        assert_eq!(run("/summarize", &conv), Some(CommandResult::Summarize));
        assert_eq!(run("/check", &conv), Some(CommandResult::Check));
        assert_eq!(
            run("/frobnicate now", &conv),
            Some(CommandResult::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_system_command() {
        let conv = Conversation::new("gpt-5-mini", "Be concise.");
        assert_eq!(
            run("/system  Answer in French. ", &conv),
            Some(CommandResult::SetInstructions("Answer in French.".to_string()))
        );
        match run("/system", &conv) {
            Some(CommandResult::Message(msg)) => assert!(msg.contains("Be concise.")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_summary_command() {
        let conv = Conversation::new("gpt-5-mini", "Be concise.");
        assert_eq!(
            run("/summary", &conv),
            Some(CommandResult::Message("[no summary yet]".to_string()))
        );
    }

    #[test]
    fn test_session_command_shows_mode() {
        let conv = Conversation::new("gpt-5-mini", "").with_mode(HistoryMode::Chained);
        match run("/session", &conv) {
            Some(CommandResult::Message(msg)) => {
                assert!(msg.contains("gpt-5-mini"));
                assert!(msg.contains("chained"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
