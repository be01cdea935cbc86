//! /model command - show and switch models

use super::CommandResult;

pub struct ModelCommand;

impl ModelCommand {
    /// Show the current model if no args, otherwise switch to the named one
    pub fn execute(args: &str, current_model: &str) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(format!(
                "Model: {}\nSwitch with: /model <name>",
                current_model
            ));
        }

        // Model ids never contain whitespace
        match args.split_whitespace().next() {
            Some(name) if name == current_model => {
                CommandResult::Message(format!("Already using {}", name))
            }
            Some(name) => CommandResult::ChangeModel(name.to_string()),
            None => CommandResult::Message("Usage: /model <name>".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_current_model() {
        match ModelCommand::execute("", "gpt-5-mini") {
            CommandResult::Message(msg) => assert!(msg.starts_with("Model: gpt-5-mini")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_switch_model() {
        assert_eq!(
            ModelCommand::execute("gpt-5 extra", "gpt-5-mini"),
            CommandResult::ChangeModel("gpt-5".to_string())
        );
    }

    #[test]
    fn test_same_model_is_not_a_switch() {
        assert!(matches!(
            ModelCommand::execute("gpt-5-mini", "gpt-5-mini"),
            CommandResult::Message(_)
        ));
    }
}
