//! One-shot prompt: send, stream the reply to stdout, exit.

use std::error::Error;

use crate::cli::chat::{open_session, print_updates};
use crate::core::config::Config;

pub async fn run_say(
    config: &Config,
    prompt: Vec<String>,
    log: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: relaychat say <prompt>");
        std::process::exit(1);
    }

    let mut session = open_session(config, log)?;
    session.submit(&prompt).await;

    if print_updates(&mut session, &mut std::io::stdout()).await? {
        std::process::exit(1);
    }
    Ok(())
}
