use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use super::{chat::ChatCommand, run::RunCommand, serve::ServeCommand};
use crate::app::starters;
use crate::config::Config;

/// A conversational web front-end for pretrained dialogue models
#[derive(Parser)]
#[command(
    name = "chatbot",
    version,
    about = "A conversational web front-end for pretrained dialogue models",
    long_about = r#"Chatbot serves a single chat page backed by a pretrained dialogue model.
Every browser session keeps its own history and model context.

The default dialogpt provider runs DialoGPT in-process and needs a build with
`--features local-model` (libtorch). Without it, use `provider = "ollama"` or
`"echo"` (CHATBOT_PROVIDER).

Examples:
  chatbot                          # Serve the chat page on 127.0.0.1:8501
  chatbot serve --port 8080        # Serve on another port
  chatbot chat                     # Chat in the terminal
  chatbot run "how are you?"       # Single exchange"#
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Configuration file to use instead of the default search paths
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the chat page (default)
    Serve(ServeCommand),

    /// Chat with the model in the terminal
    Chat(ChatCommand),

    /// Run a single exchange non-interactively
    Run(RunCommand),

    /// List the conversation starters
    Starters,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::init(self.config.as_deref()).await?;
        debug!("Configuration initialized");

        match self.command {
            Some(Commands::Serve(serve_cmd)) => serve_cmd.execute(config).await,
            Some(Commands::Chat(chat_cmd)) => chat_cmd.execute(config).await,
            Some(Commands::Run(run_cmd)) => run_cmd.execute(config).await,
            Some(Commands::Starters) => {
                for starter in starters() {
                    println!("{:<18} {}", starter.topic, starter.prompt);
                }
                Ok(())
            }
            None => ServeCommand::default().execute(config).await,
        }
    }
}
