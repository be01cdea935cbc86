//! Resolved settings: command line over environment over config file over defaults

use anyhow::{Context, bail};
use tern_agent::{CompactionConfig, HistoryMode, RequestOptions, VerifierConfig};
use tern_ai::{Api, ReasoningEffort, Verbosity, providers};

use crate::Args;
use crate::config::Config;
use crate::utils::parse_budgets;

pub const DEFAULT_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_BUDGETS: &[u32] = &[768, 1536];
pub const DEFAULT_CHECK_BUDGETS: &[u32] = &[256, 512, 1024];
pub const DEFAULT_HISTORY_TURNS: usize = 10;
pub const DEFAULT_INSTRUCTIONS: &str = "You are a concise, helpful assistant. Be direct, accurate, \
and pragmatic. Prefer clear steps and minimal fluff.";

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: Api,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub instructions: String,
    pub budgets: Vec<u32>,
    pub options: RequestOptions,
    pub stream: bool,
    pub history: HistoryMode,
    pub compaction: CompactionConfig,
    pub verifier: VerifierConfig,
    /// Key for the Responses endpoint used by /check, if any
    pub check_api_key: Option<String>,
}

fn parse_history(name: &str, limit: usize) -> anyhow::Result<HistoryMode> {
    match name.trim().to_lowercase().as_str() {
        "replay" | "full" => Ok(HistoryMode::Replay),
        "users" | "user" | "users-only" => Ok(HistoryMode::UserTurnsOnly { limit }),
        "chained" | "chain" | "server" => Ok(HistoryMode::Chained),
        other => bail!("unknown history mode '{}' (expected replay, users or chained)", other),
    }
}

impl Settings {
    /// Merge flags (which already carry TERN_* env values) with the config file.
    ///
    /// `openai_key` is the value of OPENAI_API_KEY, if set.
    pub fn resolve(args: &Args, cfg: &Config, openai_key: Option<String>) -> anyhow::Result<Self> {
        let api: Api = match args.api.as_deref().or(cfg.api.as_deref()) {
            Some(name) => name.parse().map_err(anyhow::Error::msg)?,
            None => Api::default(),
        };

        let base_url = args
            .base_url
            .clone()
            .or_else(|| cfg.base_url.clone())
            .unwrap_or_else(|| match api {
                Api::Responses => providers::responses::DEFAULT_BASE_URL.to_string(),
                Api::ChatCompletions => providers::chat::DEFAULT_BASE_URL.to_string(),
            });

        let explicit_key = args.api_key.clone().or_else(|| cfg.api_key.clone());
        let api_key = match (api, explicit_key.or_else(|| openai_key.clone())) {
            (_, Some(key)) => key,
            (Api::ChatCompletions, None) => providers::chat::PLACEHOLDER_API_KEY.to_string(),
            (Api::Responses, None) => bail!(
                "No API key found. Set OPENAI_API_KEY, pass --api-key, or add api_key to {}",
                Config::config_path().display()
            ),
        };

        let budgets = parse_budgets(
            args.budgets.as_deref().or(cfg.budgets.as_deref()).unwrap_or(""),
            DEFAULT_BUDGETS,
        );

        let reasoning_effort: ReasoningEffort = args
            .reasoning_effort
            .as_deref()
            .or(cfg.reasoning_effort.as_deref())
            .unwrap_or("low")
            .parse()
            .map_err(anyhow::Error::msg)?;
        let verbosity: Verbosity = args
            .verbosity
            .as_deref()
            .or(cfg.verbosity.as_deref())
            .unwrap_or("low")
            .parse()
            .map_err(anyhow::Error::msg)?;

        let history_turns = args
            .history_turns
            .or(cfg.history_turns)
            .unwrap_or(DEFAULT_HISTORY_TURNS);
        let history = parse_history(
            args.history.as_deref().or(cfg.history.as_deref()).unwrap_or("replay"),
            history_turns,
        )
        .context("invalid --history")?;

        let c = &cfg.compaction;
        let compaction = CompactionConfig {
            enabled: !args.no_compaction && c.enabled.unwrap_or(true),
            max_context_chars: args.max_context_chars.or(c.max_context_chars).unwrap_or(12_000),
            keep_turns: args.keep_turns.or(c.keep_turns).unwrap_or(8),
            summary_target_words: args.summary_words.or(c.summary_words).unwrap_or(120),
            summary_max_chars: args.summary_max_chars.or(c.summary_max_chars).unwrap_or(1200),
            budgets: parse_budgets(
                args.summary_budgets
                    .as_deref()
                    .or(c.summary_budgets.as_deref())
                    .unwrap_or(""),
                &budgets[..1],
            ),
            model: args.summary_model.clone().or_else(|| c.summary_model.clone()),
            // "users" mode never resends answers, so only the summary carries them
            autosummary: if args.no_autosummary {
                false
            } else {
                args.autosummary
                    || c.autosummary
                        .unwrap_or(matches!(history, HistoryMode::UserTurnsOnly { .. }))
            },
            summary_every: args.summary_every.or(c.summary_every).unwrap_or(1).max(1),
        };

        let verifier = VerifierConfig {
            model: args
                .check_model
                .clone()
                .or_else(|| cfg.check.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            budgets: parse_budgets(
                args.check_budgets
                    .as_deref()
                    .or(cfg.check.budgets.as_deref())
                    .unwrap_or(""),
                DEFAULT_CHECK_BUDGETS,
            ),
            reasoning_cap: Some(args.check_reasoning_cap.or(cfg.check.reasoning_cap).unwrap_or(64)),
        };

        // /check always talks to the OpenAI Responses endpoint
        let check_api_key = match api {
            Api::Responses => Some(api_key.clone()),
            Api::ChatCompletions => openai_key,
        };

        Ok(Self {
            api,
            base_url,
            api_key,
            model: args
                .model
                .clone()
                .or_else(|| cfg.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            instructions: args
                .instructions
                .clone()
                .or_else(|| cfg.instructions.clone())
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            budgets,
            options: RequestOptions {
                reasoning_effort: Some(reasoning_effort),
                reasoning_cap: args.reasoning_cap.or(cfg.reasoning_cap),
                verbosity: Some(verbosity),
            },
            stream: args.stream || cfg.stream.unwrap_or(false),
            history,
            compaction,
            verifier,
            check_api_key,
        })
    }
}
