use anyhow::{anyhow, Result};
use clap::Args;
use std::io::{self, Read};
use tracing::{debug, info};

use crate::app::App;
use crate::config::Config;

/// Run a single exchange non-interactively
#[derive(Args)]
pub struct RunCommand {
    /// The message to send. If not provided, will read from stdin
    pub prompt: Vec<String>,

    /// Override the maximum length for this exchange
    #[arg(short = 'm', long = "max-length")]
    pub max_length: Option<usize>,
}

impl RunCommand {
    pub async fn execute(&self, config: Config) -> Result<()> {
        debug!("Executing run command");

        let prompt = self.get_prompt()?;
        if prompt.trim().is_empty() {
            return Err(anyhow!("No prompt provided. Use arguments or pipe input via stdin."));
        }

        info!("Running prompt: {}", prompt.chars().take(50).collect::<String>());

        config.validate()?;
        let app = App::new(config);
        let session_id = app.create_session().await;
        let outcome = app.send_message(session_id, &prompt, self.max_length).await?;

        println!("{}", outcome.reply);
        if outcome.failed {
            return Err(anyhow!("Generation failed"));
        }
        Ok(())
    }

    fn get_prompt(&self) -> Result<String> {
        if !self.prompt.is_empty() {
            Ok(self.prompt.join(" "))
        } else {
            debug!("Reading prompt from stdin");
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| anyhow!("Failed to read from stdin: {}", e))?;
            Ok(buffer)
        }
    }
}
