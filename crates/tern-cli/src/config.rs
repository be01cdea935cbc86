//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for tern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Wire protocol: "responses" or "chat"
    pub api: Option<String>,
    /// Endpoint root, e.g. http://127.0.0.1:11435/v1 for a local server
    pub base_url: Option<String>,
    /// API key (alternative to OPENAI_API_KEY)
    pub api_key: Option<String>,
    /// Base instructions sent with every request
    pub instructions: Option<String>,
    /// Comma-separated output budgets, e.g. "768,1536"
    pub budgets: Option<String>,
    /// Reasoning effort hint (minimal, low, medium, high)
    pub reasoning_effort: Option<String>,
    /// Cap on hidden reasoning tokens
    pub reasoning_cap: Option<u32>,
    /// Verbosity hint (low, medium, high)
    pub verbosity: Option<String>,
    /// Stream replies as they are generated
    pub stream: Option<bool>,
    /// History mode: "replay", "users" or "chained"
    pub history: Option<String>,
    /// Prior user turns resent in "users" mode
    pub history_turns: Option<usize>,
    /// Context compression settings
    #[serde(default)]
    pub compaction: CompactionSettings,
    /// /check settings
    #[serde(default)]
    pub check: CheckSettings,
}

/// Context compression settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    pub enabled: Option<bool>,
    pub max_context_chars: Option<usize>,
    pub keep_turns: Option<usize>,
    pub summary_words: Option<usize>,
    pub summary_max_chars: Option<usize>,
    pub summary_budgets: Option<String>,
    pub summary_model: Option<String>,
    /// Refresh the summary after answers (default: on in "users" mode)
    pub autosummary: Option<bool>,
    pub summary_every: Option<usize>,
}

/// Answer verification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    pub model: Option<String>,
    pub budgets: Option<String>,
    pub reasoning_cap: Option<u32>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tern")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for TERN_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("TERN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Parse config text, falling back to defaults on error
    pub fn parse(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }
        }
    }

    /// Write the commented example config if no config file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tern configuration file
# Place at ~/.config/tern/config.toml (Linux) or set TERN_CONFIG_PATH.
# Command-line flags and TERN_* environment variables override these values.

# Model to use
model = "gpt-5-mini"

# Wire protocol: "responses" (OpenAI) or "chat" (LM Studio and other
# OpenAI-compatible servers)
api = "responses"

# Endpoint root
# base_url = "https://api.openai.com/v1"
# base_url = "http://127.0.0.1:11435/v1"

# API key (optional - OPENAI_API_KEY is used otherwise)
# api_key = "sk-..."

# Base instructions
# instructions = "You are a concise, helpful assistant."

# Output budgets tried in ascending order when a reply is cut short
budgets = "768,1536"

# Request hints (dropped automatically if the endpoint rejects them)
reasoning_effort = "low"
verbosity = "low"
# reasoning_cap = 64

# Stream replies as they are generated
stream = false

# History mode: "replay" (resend all live turns), "users" (resend only
# recent user turns) or "chained" (server keeps history)
history = "replay"
# history_turns = 10

[compaction]
enabled = true
max_context_chars = 12000
keep_turns = 8
summary_words = 120
summary_max_chars = 1200
# summary_budgets = "768"
# summary_model = "gpt-5-nano"
# Merge each answered exchange into the summary (defaults to on when
# history = "users", since that mode never resends answers)
# autosummary = true
# summary_every = 1

[check]
model = "gpt-5-mini"
budgets = "256,512,1024"
reasoning_cap = 64
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let cfg: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(cfg.model.as_deref(), Some("gpt-5-mini"));
        assert_eq!(cfg.budgets.as_deref(), Some("768,1536"));
        assert_eq!(cfg.compaction.keep_turns, Some(8));
        assert_eq!(cfg.check.reasoning_cap, Some(64));
        assert_eq!(cfg.stream, Some(false));
    }

    #[test]
    fn test_partial_config() {
        let cfg = Config::parse(
            "api = \"chat\"\n[compaction]\nenabled = false\nautosummary = false\nsummary_every = 3\n",
        );
        assert_eq!(cfg.api.as_deref(), Some("chat"));
        assert_eq!(cfg.compaction.enabled, Some(false));
        assert_eq!(cfg.compaction.autosummary, Some(false));
        assert_eq!(cfg.compaction.summary_every, Some(3));
        assert!(cfg.model.is_none());
        assert!(cfg.check.model.is_none());
    }

    #[test]
    fn test_invalid_config_falls_back_to_default() {
        let cfg = Config::parse("model = [");
        assert!(cfg.model.is_none());
    }
}
