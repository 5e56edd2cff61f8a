//! Line-oriented interactive chat against a running relay.

use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::config::Config;
use crate::core::conversation::ConversationUpdate;
use crate::core::jokes::BuiltinJokes;
use crate::core::session::ChatSession;
use crate::utils::logging::TranscriptLog;

const REGENERATE_COMMAND: &str = "/regenerate";
const QUIT_COMMAND: &str = "/quit";

pub fn open_session(config: &Config, log: Option<&str>) -> Result<ChatSession, Box<dyn Error>> {
    let transcript = match log {
        Some(path) => TranscriptLog::new(path)?,
        None => TranscriptLog::disabled(),
    };
    Ok(ChatSession::new(
        reqwest::Client::new(),
        config.client.chat_endpoint(),
        Arc::new(BuiltinJokes::default()),
        transcript,
    ))
}

pub async fn run_chat(config: &Config, log: Option<&str>) -> Result<(), Box<dyn Error>> {
    let mut session = open_session(config, log)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!(
        "Connected to {}. Type {REGENERATE_COMMAND} to retry the last reply, {QUIT_COMMAND} to exit.",
        config.client.chat_endpoint()
    );

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let accepted = match line.trim() {
            QUIT_COMMAND => break,
            REGENERATE_COMMAND => {
                let accepted = session.regenerate_last().await;
                if !accepted {
                    eprintln!("Nothing to regenerate yet.");
                }
                accepted
            }
            _ => session.submit(&line).await,
        };

        if accepted {
            print_updates(&mut session, &mut std::io::stdout()).await?;
        }
    }

    Ok(())
}

/// Writes updates to `out` as they arrive until the session is idle again.
/// Returns true if the exchange ended with an error.
pub async fn print_updates(
    session: &mut ChatSession,
    out: &mut impl Write,
) -> Result<bool, Box<dyn Error>> {
    let mut printed = 0usize;
    let mut errored = false;

    while let Some(update) = session.next_update().await {
        match update {
            ConversationUpdate::Appended(message) => {
                out.write_all(message.content.as_bytes())?;
                printed = message.content.len();
            }
            ConversationUpdate::Updated(message) => {
                if let Some(delta) = message.content.get(printed..) {
                    out.write_all(delta.as_bytes())?;
                }
                printed = message.content.len();
            }
            ConversationUpdate::Streaming => {}
            ConversationUpdate::Finished {
                errored: failed,
                error_message,
            } => {
                if let Some(message) = error_message {
                    if printed > 0 {
                        writeln!(out)?;
                    }
                    out.write_all(message.content.as_bytes())?;
                }
                writeln!(out)?;
                errored = failed;
            }
        }
        out.flush()?;
    }

    Ok(errored)
}
