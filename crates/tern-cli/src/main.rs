//! tern - chat client with running-summary context management

mod commands;
mod config;
mod settings;
mod utils;

use std::io::{IsTerminal, Read, Write};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tern_agent::{
    CompletionClient, Conversation, Session, SessionConfig, SessionEvent, TurnOutcome, Verifier,
};
use tern_ai::{Api, providers};

use crate::commands::{CommandResult, SessionInfo};
use crate::settings::Settings;

/// tern - chat with a completion service without losing the thread
#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gpt-5-mini)
    #[arg(short, long, env = "TERN_MODEL")]
    model: Option<String>,

    /// Wire protocol (responses, chat)
    #[arg(short, long, env = "TERN_API")]
    api: Option<String>,

    /// Endpoint root URL
    #[arg(long, env = "TERN_BASE_URL")]
    base_url: Option<String>,

    /// API key (default: OPENAI_API_KEY)
    #[arg(long, env = "TERN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base instructions sent with every request
    #[arg(short, long, env = "TERN_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Comma-separated output budgets, tried in ascending order
    #[arg(short, long, env = "TERN_BUDGETS")]
    budgets: Option<String>,

    /// Reasoning effort hint (minimal, low, medium, high)
    #[arg(long, env = "TERN_REASONING_EFFORT")]
    reasoning_effort: Option<String>,

    /// Cap on hidden reasoning tokens
    #[arg(long, env = "TERN_REASONING_CAP")]
    reasoning_cap: Option<u32>,

    /// Verbosity hint (low, medium, high)
    #[arg(long, env = "TERN_VERBOSITY")]
    verbosity: Option<String>,

    /// Stream answers as they are generated
    #[arg(short, long, env = "TERN_STREAM")]
    stream: bool,

    /// History mode (replay, users, chained)
    #[arg(long, env = "TERN_HISTORY")]
    history: Option<String>,

    /// Prior user turns resent in "users" history mode
    #[arg(long, env = "TERN_HISTORY_TURNS")]
    history_turns: Option<usize>,

    /// Estimated context size (chars) that triggers compression
    #[arg(long, env = "TERN_MAX_CONTEXT_CHARS")]
    max_context_chars: Option<usize>,

    /// Exchanges kept verbatim when compressing
    #[arg(long, env = "TERN_KEEP_TURNS")]
    keep_turns: Option<usize>,

    /// Target summary length in words
    #[arg(long, env = "TERN_SUMMARY_WORDS")]
    summary_words: Option<usize>,

    /// Hard cap on summary length in chars
    #[arg(long, env = "TERN_SUMMARY_MAX_CHARS")]
    summary_max_chars: Option<usize>,

    /// Output budgets for summary requests
    #[arg(long, env = "TERN_SUMMARY_BUDGETS")]
    summary_budgets: Option<String>,

    /// Model used for summaries (default: the chat model)
    #[arg(long, env = "TERN_SUMMARY_MODEL")]
    summary_model: Option<String>,

    /// Disable context compression
    #[arg(long)]
    no_compaction: bool,

    /// Merge every answered exchange into the summary (default in "users" mode)
    #[arg(long, conflicts_with = "no_autosummary")]
    autosummary: bool,

    /// Never refresh the summary after answers
    #[arg(long)]
    no_autosummary: bool,

    /// Refresh the summary every N exchanges
    #[arg(long, env = "TERN_SUMMARY_EVERY")]
    summary_every: Option<usize>,

    /// Model used by /check
    #[arg(long, env = "TERN_CHECK_MODEL")]
    check_model: Option<String>,

    /// Output budgets for /check
    #[arg(long, env = "TERN_CHECK_BUDGETS")]
    check_budgets: Option<String>,

    /// Reasoning cap for /check
    #[arg(long, env = "TERN_CHECK_REASONING_CAP")]
    check_reasoning_cap: Option<u32>,

    /// Answer a single prompt and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Read one prompt from stdin, answer it and exit
    #[arg(long)]
    one_shot: bool,

    /// Verbose output
    #[arg(short, long, alias = "debug")]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so piped answers stay clean
    if args.verbose {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tern=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let settings = match Settings::resolve(&args, &cfg, std::env::var("OPENAI_API_KEY").ok()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!(
        "Settings: api={} base_url={} model={} budgets={:?} history={}",
        settings.api.name(),
        settings.base_url,
        settings.model,
        settings.budgets,
        settings.history.name()
    );

    let service = providers::connect(settings.api, &settings.base_url, settings.api_key.clone());
    let client = CompletionClient::new(service).with_options(settings.options);
    let conversation = Conversation::new(settings.model.clone(), settings.instructions.clone())
        .with_mode(settings.history);
    let mut session = Session::new(
        conversation,
        client,
        SessionConfig {
            budgets: settings.budgets.clone(),
            stream: settings.stream,
            compaction: settings.compaction.clone(),
        },
    );

    let one_shot = args.command.is_some() || args.one_shot || !std::io::stdin().is_terminal();
    if one_shot {
        let code = run_one_shot(&mut session, args.command).await?;
        std::process::exit(code);
    }

    let verifier = build_verifier(&settings);
    run_interactive(&mut session, &settings, verifier.as_ref()).await
}

/// /check always uses a Responses endpoint
fn build_verifier(settings: &Settings) -> Option<Verifier> {
    let key = settings.check_api_key.clone()?;
    let base_url = match settings.api {
        Api::Responses => settings.base_url.as_str(),
        Api::ChatCompletions => providers::responses::DEFAULT_BASE_URL,
    };
    let provider = providers::ResponsesProvider::new(key).with_base_url(base_url);
    let client = CompletionClient::new(Arc::new(provider));
    Some(Verifier::new(client, settings.verifier.clone()))
}

/// Answer one prompt; returns the process exit code
async fn run_one_shot(session: &mut Session, command: Option<String>) -> anyhow::Result<i32> {
    let prompt = match command {
        Some(prompt) => prompt,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let prompt = prompt.trim();
    if prompt.is_empty() {
        eprintln!("No prompt provided.");
        return Ok(1);
    }

    // The answer is normalized before printing, so nothing is streamed
    session.set_stream(false);
    let outcome = session
        .submit(prompt, &mut |_| {}, &CancellationToken::new())
        .await?;
    match outcome {
        TurnOutcome::Answered(text) => {
            println!("{}", utils::normalize_whitespace(&text));
            Ok(0)
        }
        other => {
            if let TurnOutcome::Failed { placeholder } = &other {
                tracing::warn!("One-shot request failed: {}", placeholder);
            }
            println!("[no text returned]");
            Ok(2)
        }
    }
}

fn print_event(event: SessionEvent, streamed: &mut bool) {
    match event {
        SessionEvent::CompactionStart { .. } => {
            if *streamed {
                println!();
            }
            println!("(updating conversation summary...)");
        }
        SessionEvent::CompactionEnd { reason, outcome } => {
            tracing::debug!(
                "Compression ({:?}): {}",
                reason,
                utils::compaction_outcome_str(&outcome)
            );
        }
        SessionEvent::TextDelta { delta } => {
            print!("{}", delta);
            std::io::stdout().flush().ok();
            *streamed = true;
        }
        SessionEvent::AttemptRestart {
            max_output_tokens,
            reason,
        } => {
            if *streamed {
                println!();
            }
            println!("{}", utils::restart_notice(reason, max_output_tokens));
        }
    }
}

async fn run_turn(session: &mut Session, input: &str) -> anyhow::Result<()> {
    let mut streamed = false;
    let outcome = {
        let mut on_event = |event: SessionEvent| print_event(event, &mut streamed);
        let cancel = CancellationToken::new();
        let submit = session.submit(input, &mut on_event, &cancel);
        tokio::pin!(submit);
        tokio::select! {
            outcome = &mut submit => outcome,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                submit.await
            }
        }
    }?;

    match (&outcome, streamed) {
        (TurnOutcome::Answered(_), true) => println!(),
        (_, true) => {
            println!();
            println!("{}", outcome.display_text());
        }
        (_, false) => println!("{}", outcome.display_text()),
    }
    Ok(())
}

async fn run_interactive(
    session: &mut Session,
    settings: &Settings,
    verifier: Option<&Verifier>,
) -> anyhow::Result<()> {
    if std::io::stderr().is_terminal() {
        eprintln!(
            "tern ({}, {} api, {} history) /help for commands",
            session.conversation().model(),
            settings.api.name(),
            session.conversation().mode().name()
        );
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            // EOF
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let info = SessionInfo {
            api: settings.api,
            tier: session.client().starting_tier(),
            stream: session.config().stream,
        };
        if let Some(result) = commands::execute_command(input, session.conversation(), &info) {
            match result {
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Exit => break,
                CommandResult::Reset => {
                    session.reset();
                    println!("[history cleared]");
                }
                CommandResult::ChangeModel(model) => {
                    session.set_model(model.as_str());
                    println!("[model set to {}]", model);
                }
                CommandResult::SetInstructions(text) => {
                    session.set_base_instructions(text);
                    println!("[instructions updated]");
                }
                CommandResult::Summarize => {
                    let mut streamed = false;
                    let outcome = session
                        .summarize_now(&mut |event| print_event(event, &mut streamed))
                        .await;
                    println!("[{}]", utils::compaction_outcome_str(&outcome));
                }
                CommandResult::Check => run_check(session, verifier).await,
                CommandResult::Unknown(cmd) => {
                    println!("[unknown command /{}; /help]", cmd);
                }
            }
            println!();
            continue;
        }

        run_turn(session, input).await?;
        println!();
    }

    Ok(())
}

async fn run_check(session: &Session, verifier: Option<&Verifier>) {
    let Some(verifier) = verifier else {
        println!("[/check] Needs OPENAI_API_KEY for the Responses endpoint.");
        return;
    };
    let Some((question, answer)) = session.conversation().last_exchange() else {
        println!("[/check] No recent Q/A pair found.");
        return;
    };
    match verifier.check(question, answer).await {
        Some(verdict) => println!("[/check] {}", utils::normalize_whitespace(&verdict)),
        None => println!("[/check] (empty)"),
    }
}
