//! Terminal client: ask questions, inspect plugins and conversations, and
//! manage settings without the HTTP API.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unreachable,
    clippy::indexing_slicing,
    clippy::print_stdout,
    clippy::print_stderr
)]

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use atmark::chat::{self, ChatEmitter};
use atmark::dispatcher::SubstitutionRecord;
use atmark::error::AppError;
use atmark::merge;
use atmark::parser::Occurrence;
use atmark::plugin::enabled_ids;
use atmark::settings::{AppSettings, LlmConfigInfo};
use atmark::state::AppState;
use atmark::store::MessageBody;

#[derive(Parser)]
#[command(name = "atmark-cli", about = "Chat with inline plugin commands", version)]
struct Cli {
    /// Directory holding settings and conversations.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a question to the active conversation and stream the answer.
    Ask {
        question: String,
        /// Conversation uuid; defaults to the active one.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List registered plugins and their enabled state.
    Plugins,
    /// Print the prompt prefix the enabled plugins produce.
    Prompt,
    /// List conversations.
    Conversations,
    /// Show a conversation's messages with command results spliced in.
    History {
        /// Conversation uuid; defaults to the active one.
        conversation: Option<String>,
    },
    /// Store the completion API key.
    SetKey { api_key: String },
    /// Show the current provider configuration (key redacted).
    Config,
}

/// Streams deltas straight to stdout and reports command activity on the way.
struct StdoutEmitter {
    json: bool,
}

impl ChatEmitter for StdoutEmitter {
    fn emit_delta(&self, delta: &str) {
        if !self.json {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
    }

    fn emit_command(&self, occurrence: &Occurrence) {
        if !self.json {
            eprintln!("\n[running @{}({})]", occurrence.name, occurrence.query);
        }
    }

    fn emit_substitutions(&self, records: &[SubstitutionRecord]) {
        if !self.json {
            for record in records {
                match (&record.result, &record.error) {
                    (_, Some(error)) => eprintln!("[{} failed: {error}]", record.plugin_id),
                    (Some(_), None) => eprintln!("[{} resolved]", record.plugin_id),
                    (None, None) => {}
                }
            }
        }
    }

    fn emit_complete(&self, _message_uuid: &str) {}

    fn emit_error(&self, error: &AppError) {
        eprintln!("error: {error}");
    }
}

fn config_dir(cli: &Cli) -> PathBuf {
    cli.config_dir
        .clone()
        .unwrap_or_else(atmark::paths::default_config_dir)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<(), AppError> {
    let state = Arc::new(AppState::initialize(config_dir(cli))?);

    match &cli.command {
        Command::Ask {
            question,
            conversation,
        } => {
            let conversation = conversation
                .clone()
                .unwrap_or_else(|| state.with_store(|s| s.active.clone()));
            let emitter = StdoutEmitter { json: cli.json };
            let message = chat::send_message(&state, &emitter, &conversation, question).await?;

            match message {
                Some(message) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&message)?);
                }
                Some(message) => {
                    if let MessageBody::Answer {
                        content,
                        substitutions,
                    } = &message.body
                    {
                        if !substitutions.is_empty() {
                            let segments = merge::merge(content, substitutions)?;
                            println!("\n\n{}", merge::render_plain(&segments));
                        } else {
                            println!();
                        }
                    }
                }
                None => eprintln!("cancelled"),
            }
        }
        Command::Plugins => {
            let states = state.with_store(|s| s.plugin_states.clone());
            let enabled = enabled_ids(states.iter());
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&state.registry.catalog())?);
            } else {
                for info in state.registry.catalog() {
                    let marker = if enabled.contains(&info.id) { "+" } else { "-" };
                    println!("{marker} @{} [{}] {}", info.command, info.id, info.name);
                }
            }
        }
        Command::Prompt => {
            let states = state.with_store(|s| s.plugin_states.clone());
            let messages = state.registry.prompt_messages(&enabled_ids(states.iter()));
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                for message in messages {
                    println!("[{:?}] {}", message.role, message.content);
                    println!();
                }
            }
        }
        Command::Conversations => {
            state.with_store(|store| {
                if cli.json {
                    let list: Vec<_> = store
                        .conversations
                        .iter()
                        .map(|c| {
                            json!({
                                "uuid": c.uuid,
                                "title": c.title,
                                "messages": c.messages.len(),
                                "active": c.uuid == store.active,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&list).unwrap());
                } else {
                    for c in &store.conversations {
                        let marker = if c.uuid == store.active { "*" } else { " " };
                        println!("{marker} {} {} ({} messages)", c.uuid, c.title, c.messages.len());
                    }
                }
            });
        }
        Command::History { conversation } => {
            let uuid = conversation
                .clone()
                .unwrap_or_else(|| state.with_store(|s| s.active.clone()));
            let conversation = state.with_store(|s| s.conversation(&uuid).cloned())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&conversation)?);
                return Ok(());
            }
            for message in &conversation.messages {
                match &message.body {
                    MessageBody::Question { content } => println!("> {content}"),
                    MessageBody::Answer {
                        content,
                        substitutions,
                    } => {
                        let segments = merge::merge(content, substitutions)?;
                        println!("{}", merge::render_plain(&segments));
                        println!();
                    }
                }
            }
        }
        Command::SetKey { api_key } => {
            let mut settings = state.with_settings(|s| s.cloned()).unwrap_or_else(AppSettings::default);
            settings.llm.api_key = Some(api_key.clone());
            state.save_settings(settings)?;
            println!("api key saved");
        }
        Command::Config => {
            state.with_settings(|settings| match settings {
                Some(settings) => {
                    let info = LlmConfigInfo::from(&settings.llm);
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&info).unwrap());
                    } else {
                        println!("base url:    {}", info.base_url);
                        println!("model:       {}", info.model.as_deref().unwrap_or("(default)"));
                        println!("temperature: {}", info.temperature.map_or("(default)".to_string(), |t| t.to_string()));
                        println!("api key:     {}", if info.has_api_key { "set" } else { "not set" });
                    }
                }
                None => println!("no settings yet; run set-key first"),
            });
        }
    }

    Ok(())
}
