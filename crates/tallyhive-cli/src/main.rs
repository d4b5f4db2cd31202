use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tallyhive_core::*;
use tallyhive_provider::{LlmProvider, ProviderRegistry};
use tallyhive_schema::{ConversationOwner, HistoryTurn, SemanticState};
use tallyhive_temporal::TemporalResolver;

mod services;

use services::{Applied, LocalServices};

/// Prior turns kept for the interpreter in the REPL.
const REPL_HISTORY: usize = 12;

#[derive(Parser)]
#[command(name = "tallyhive", version, about = "tallyhive conversational task resolution engine")]
struct Cli {
    #[arg(long, default_value = "config/tallyhive.yaml", help = "Engine config file")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate the config file")]
    Validate {
        #[arg(long, help = "Also check that the nlu provider answers")]
        ping: bool,
    },
    #[command(about = "Local REPL against in-memory ledger and calendar")]
    Chat {
        #[arg(long, default_value = "repl", help = "Conversation id")]
        conversation: String,
        #[arg(long, help = "Print every resolved state as JSON")]
        json: bool,
    },
    #[command(about = "Resolve a day and clock time to an absolute instant")]
    When {
        #[arg(help = "Day word, e.g. amanhã, sexta, today")]
        day: String,
        #[arg(help = "Clock time, e.g. 15h, 3pm, 09:30")]
        time: String,
        #[arg(long, help = "IANA time zone (defaults to the config's)")]
        tz: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { ping } => {
            let config = load_engine_config(&cli.config)?;
            println!(
                "Config valid. timezone={}, {} providers, nlu provider: {}.",
                config.timezone,
                config.providers.len(),
                config.nlu.provider_id.as_deref().unwrap_or("none (offline grammar)")
            );
            if ping {
                let registry = nlu_registry(&config)?;
                for id in registry.ids() {
                    match registry.get(id)?.health().await {
                        Ok(()) => println!("provider {id}: ok"),
                        Err(e) => println!("provider {id}: {e:#}"),
                    }
                }
            }
        }
        Commands::Chat { conversation, json } => {
            run_repl(&cli.config, &conversation, json).await?;
        }
        Commands::When { day, time, tz } => {
            let tz = match tz {
                Some(tz) => tz,
                None => load_engine_config(&cli.config)?.timezone,
            };
            let resolver = TemporalResolver::from_name(&tz)?;
            let now = resolver.now();
            let at = resolver
                .resolve_relative(&day, &time, now)
                .ok_or_else(|| anyhow!("cannot resolve \"{day}\" at \"{time}\""))?;
            println!("{} ({tz} {})", at.to_rfc3339(), resolver.render(at));
        }
    }

    Ok(())
}

/// Only the provider in use must have working credentials.
fn nlu_registry(config: &EngineConfig) -> Result<ProviderRegistry> {
    ProviderRegistry::from_configs(
        config
            .providers
            .iter()
            .filter(|p| config.nlu.provider_id.as_deref() == Some(p.id.as_str())),
    )
}

fn build_engine(config: &EngineConfig, calendar: Arc<InMemoryCalendar>) -> Result<IntentResolver> {
    let registry = nlu_registry(config)?;

    IntentResolver::from_config(
        config,
        &registry,
        calendar,
        Arc::new(StaticCategoryNormalizer::everyday()),
    )
}

async fn run_repl(config_path: &Path, conversation: &str, json: bool) -> Result<()> {
    let config = load_engine_config(config_path)?;
    let calendar = Arc::new(InMemoryCalendar::new());
    let engine = build_engine(&config, calendar.clone())?;
    let owner = ConversationOwner::new(conversation, "local", "me");
    let services = LocalServices::new(calendar, owner.clone());
    let mut history: Vec<HistoryTurn> = Vec::new();
    tracing::info!(conversation, provider = ?config.nlu.provider_id, "repl started");

    println!("tallyhive REPL ({}). Commands: /context, /reset, quit.", config.timezone);
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        match input {
            "" => continue,
            "quit" | "exit" => break,
            "/context" => {
                println!("{}", engine.snapshot(&owner).await.to_json());
                continue;
            }
            "/reset" => {
                engine.clear_conversation_state(&owner).await;
                history.clear();
                println!("(conversation state cleared)");
                continue;
            }
            _ => {}
        }

        let mut pending = Some(input.to_string());
        while let Some(message) = pending.take() {
            let state = engine.resolve_intention(&message, &history, &owner).await;
            let reply = describe(&engine, &state, json)?;
            println!("{reply}");

            match services.apply(&state, engine.resolver().now()).await {
                Ok(Applied::Recorded(action)) => {
                    engine.record_materialized_action(&owner, action).await;
                }
                Ok(Applied::Removed(id)) => {
                    engine.forget_action(&owner, &id).await;
                }
                Ok(Applied::Nothing) => {}
                Err(e) => eprintln!("Error: {e}"),
            }

            history.push(HistoryTurn::user(message));
            history.push(HistoryTurn::assistant(reply));
            if history.len() > REPL_HISTORY {
                history.drain(..history.len() - REPL_HISTORY);
            }

            if engine.snapshot(&owner).await.active_task.is_none() {
                pending = engine.consume_queued_message(&owner).await;
                if let Some(queued) = &pending {
                    println!("(retomando: {queued})");
                }
            }
        }
    }

    Ok(())
}

fn describe(engine: &IntentResolver, state: &SemanticState, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(state)?);
    }
    if let Some(message) = &state.clarification_message {
        return Ok(message.clone());
    }
    if !state.ready_to_save {
        return Ok(format!("[{}]", state.intent));
    }
    let mut line = format!("[{}] pronto", state.intent);
    if let Some(title) = state.title.as_deref().or(state.description.as_deref()) {
        line.push_str(&format!(" | {title}"));
    }
    if let Some(amount) = state.amount {
        line.push_str(&format!(" | R$ {amount:.2}"));
    }
    if let Some(category) = &state.category {
        line.push_str(&format!(" | {category}"));
    }
    if let Some(at) = state.resolved_at {
        line.push_str(&format!(" | {}", engine.resolver().render(at)));
    }
    if let Some(periodo) = state.periodo {
        if state.intent.target_type().is_none() {
            line.push_str(&format!(" | {}", periodo.as_str()));
        }
    }
    Ok(line)
}
