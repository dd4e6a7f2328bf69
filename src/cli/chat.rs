use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use crate::app::{find_starter, starters, App};
use crate::config::Config;

/// Chat with the model in the terminal
#[derive(Args)]
pub struct ChatCommand {
    /// Override the maximum length for every exchange
    #[arg(short = 'm', long = "max-length")]
    pub max_length: Option<usize>,
}

/// What a line typed at the prompt asks for
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Message(&'a str),
    Starter(&'a str),
    Clear,
    Stats,
    Starters,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "clear" => Input::Clear,
        "stats" => Input::Stats,
        "starters" if arg.is_empty() => Input::Starters,
        "starters" | "starter" => Input::Starter(arg),
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(name),
    }
}

impl ChatCommand {
    pub async fn execute(&self, config: Config) -> Result<()> {
        debug!("Executing chat command");
        config.validate()?;

        let app = App::new(config);
        let status = app.model_status().await;
        if !status.ready {
            eprintln!("Failed to load the chatbot model ({}). Messages will fail.", status.model);
        }
        let session_id = app.create_session().await;

        println!("Chatting with {} ({}).", status.model, status.provider);
        println!("Commands: /clear, /stats, /starters [topic], /quit");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("You: ");
            std::io::stdout().flush().context("Failed to flush stdout")?;

            let Some(line) = lines.next_line().await.context("Failed to read from stdin")? else {
                break;
            };

            match parse_input(&line) {
                Input::Empty => {}
                Input::Quit => break,
                Input::Message(text) => self.exchange(&app, session_id, text).await,
                Input::Starter(topic) => match find_starter(topic) {
                    Some(starter) => {
                        println!("You: {}", starter.prompt);
                        self.exchange(&app, session_id, starter.prompt).await;
                    }
                    None => eprintln!("Unknown conversation starter: {}", topic),
                },
                Input::Clear => {
                    app.clear(session_id).await?;
                    println!("Chat history cleared.");
                }
                Input::Stats => {
                    let stats = app.stats(session_id).await?;
                    println!(
                        "Messages: {} ({} exchanges), context tokens: {}",
                        stats.total_messages, stats.exchanges, stats.context_tokens
                    );
                }
                Input::Starters => {
                    for starter in starters() {
                        println!("  {:<18} {}", starter.topic, starter.prompt);
                    }
                }
                Input::Unknown(name) => eprintln!("Unknown command: /{}", name),
            }
        }

        Ok(())
    }

    async fn exchange(&self, app: &App, session_id: Uuid, text: &str) {
        match app.send_message(session_id, text, self.max_length).await {
            Ok(outcome) => println!("AI: {}", outcome.reply),
            Err(e) => eprintln!("{}", e),
        }
    }
}
