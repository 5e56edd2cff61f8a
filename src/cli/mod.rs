//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod init;
pub mod say;


use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::chat::run_chat;
use crate::cli::init::run_init;
use crate::cli::say::run_say;
use crate::core::config::Config;
use crate::server::serve;

const DEFAULT_LOG_FILTER: &str = "relaychat=info";

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(about = "A streaming chat relay and terminal client for OpenAI-compatible APIs")]
#[command(
    long_about = "relaychat runs a small HTTP relay in front of an OpenAI-compatible \
completion API and a terminal client that talks to it.\n\n\
The relay forwards the posted conversation upstream and streams the reply back as \
`data: {\"content\": ...}` lines terminated by `data: [DONE]`.\n\n\
Environment Variables:\n\
  OPENROUTER_API_KEY      API key used by the relay (name configurable)\n\
  RELAYCHAT_BASE_URL      Override the provider base URL\n\
  RELAYCHAT_MODEL         Override the model\n\
  RELAYCHAT_LISTEN_ADDR   Override the relay listen address\n\
  RELAYCHAT_RELAY_URL     Override the relay URL used by chat and say\n\
  RUST_LOG                Diagnostic log filter (default: relaychat=info)\n\n\
Chat commands:\n\
  /regenerate             Replace the last assistant reply\n\
  /quit                   Exit"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Append the conversation transcript to this file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,

    /// Read configuration from this file instead of the default location
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the streaming relay
    Serve,
    /// Start an interactive chat against the relay (default)
    Chat,
    /// Write a config file with the default settings
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Send a single prompt and print the reply
    Say {
        /// Prompt text (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Commands::Chat);
    if let Commands::Init { force } = command {
        return run_init(args.config.as_deref(), force);
    }

    let config = Config::load(args.config.as_deref())?;
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Serve => serve(&config).await,
        Commands::Chat => run_chat(&config, args.log.as_deref()).await,
        Commands::Say { prompt } => run_say(&config, prompt, args.log.as_deref()).await,
    }
}
