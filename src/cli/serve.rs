use anyhow::Result;
use clap::Args;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::config::Config;
use crate::web;

/// Serve the chat page
#[derive(Args, Default)]
pub struct ServeCommand {
    /// Address to bind, overrides the configured host
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on, overrides the configured port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,
}

/// Startup warning for a provider this binary cannot serve
fn missing_backend(provider: &str) -> Option<String> {
    if provider == "dialogpt" && !cfg!(feature = "local-model") {
        Some(
            "the dialogpt provider needs a build with `--features local-model` (libtorch); \
             every message will fail with 503. Set CHATBOT_PROVIDER=ollama or echo to serve without it"
                .to_string(),
        )
    } else {
        None
    }
}

impl ServeCommand {
    pub async fn execute(self, mut config: Config) -> Result<()> {
        debug!("Executing serve command");

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.validate()?;
        let addr = config.bind_addr().await?;

        if let Some(hint) = missing_backend(&config.provider) {
            warn!("{}", hint);
        }
        info!("Loading {} model {}", config.provider, config.model);
        let app = Arc::new(App::new(config));
        let events = app.start_event_loop().await?;

        let result = web::serve(app.clone(), addr).await;

        app.shutdown();
        let _ = events.await;
        info!("Server stopped");
        result
    }
}
