//! Core application logic and orchestration
//!
//! This module provides the chat service that sits between the presentation
//! layers and the generation backend: it validates input, runs one exchange
//! per submit and keeps each session's history consistent.

mod errors;
mod events;
mod starters;

pub use errors::*;
pub use events::*;
pub use starters::*;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    llm::{
        utils::sanitize_content, GenerationRequest, LlmProvider, ProviderFactory, TokenUsage,
        UnavailableProvider,
    },
    session::{ConversationStats, ReplyOutcome, SessionStore, Turn},
};

/// How often idle sessions are looked for
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Result of one submit
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeOutcome {
    pub session_id: Uuid,
    pub reply: String,
    /// The model call failed and `reply` is the apology text
    pub failed: bool,
    /// False when the session was cleared while the model was running
    pub recorded: bool,
    pub usage: Option<TokenUsage>,
}

/// Which model is serving and whether it is ready
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub provider: String,
    pub model: String,
    pub ready: bool,
}

/// Main application structure
pub struct App {
    config: Config,
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<SessionStore>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<AppEvent>>>,
}

impl App {
    /// Create a new application instance.
    ///
    /// A model that fails to load does not stop the application: the
    /// failure is logged and reported on every send instead.
    pub fn new(config: Config) -> Self {
        debug!("Creating new App instance");

        let provider_config = config.provider_config();
        let provider: Arc<dyn LlmProvider> = match ProviderFactory::create_provider(provider_config.clone()) {
            Ok(provider) => {
                if let Err(e) = provider.validate_config() {
                    warn!("Provider configuration looks wrong: {}", e);
                }
                Arc::from(provider)
            }
            Err(e) => {
                error!("Error loading model: {}", e);
                Arc::new(UnavailableProvider::new(&provider_config, e.to_string()))
            }
        };

        Self::with_provider(config, provider)
    }

    /// Create an application around an already constructed provider
    pub fn with_provider(config: Config, provider: Arc<dyn LlmProvider>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            provider,
            sessions: Arc::new(SessionStore::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start the application event loop. The loop ends on `Shutdown` or
    /// when the application is dropped.
    pub async fn start_event_loop(&self) -> Result<JoinHandle<()>> {
        let mut event_rx = self
            .event_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("Event loop already started"))?;

        Ok(tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if event == AppEvent::Shutdown {
                    info!("Application shutdown requested");
                    break;
                }
                Self::handle_event(event);
            }
            debug!("Event loop finished");
        }))
    }

    /// Handle application events
    fn handle_event(event: AppEvent) {
        match event {
            AppEvent::SessionCreated { session_id } => {
                info!("Session created: {}", session_id);
            }
            AppEvent::SessionCleared { session_id } => {
                info!("Session cleared: {}", session_id);
            }
            AppEvent::SessionsPruned { count } => {
                debug!("Pruned {} idle sessions", count);
            }
            AppEvent::MessageSent { session_id } => {
                debug!("Message sent in session {}", session_id);
            }
            AppEvent::ReplyGenerated {
                session_id,
                input_tokens,
                output_tokens,
            } => {
                debug!(
                    "Reply generated in session {} ({} in / {} out tokens)",
                    session_id, input_tokens, output_tokens
                );
            }
            AppEvent::GenerationFailed { session_id, error } => {
                warn!("Generation failed in session {}: {}", session_id, error);
            }
            AppEvent::Error { error } => {
                error!("Application error: {}", error);
            }
            AppEvent::Shutdown => {}
        }
    }

    fn emit(&self, event: AppEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    /// Ask the event loop to stop
    pub fn shutdown(&self) {
        self.emit(AppEvent::Shutdown);
    }

    /// Start a new session
    pub async fn create_session(&self) -> Uuid {
        let id = self.sessions.create().await;
        self.emit(AppEvent::SessionCreated {
            session_id: id.to_string(),
        });
        id
    }

    /// Reuse a known session id or start a new session
    pub async fn resolve_session(&self, id: Option<Uuid>) -> Uuid {
        let (id, created) = self.sessions.get_or_create(id).await;
        if created {
            self.emit(AppEvent::SessionCreated {
                session_id: id.to_string(),
            });
        }
        id
    }

    fn normalize_input(&self, text: &str) -> ChatResult<String> {
        let text = sanitize_content(text).trim().to_string();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.config.max_message_chars {
            return Err(ChatError::MessageTooLong {
                len,
                limit: self.config.max_message_chars,
            });
        }
        Ok(text)
    }

    /// Run one exchange: append the user message and the model's reply to
    /// the session history.
    ///
    /// `max_length` overrides the configured length budget and is clamped
    /// into the accepted range. The model call runs on its own task so an
    /// abandoned request still completes and releases the session.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        text: &str,
        max_length: Option<usize>,
    ) -> ChatResult<ExchangeOutcome> {
        let text = self.normalize_input(text)?;

        let (ticket, context) = self
            .sessions
            .with_session(&session_id, |s| s.begin_exchange())
            .await
            .ok_or(ChatError::SessionNotFound(session_id))?
            .ok_or(ChatError::Busy)?;

        let generation = &self.config.generation;
        let params = generation.with_max_length(max_length.unwrap_or(generation.max_length));
        let request = GenerationRequest::new(text.clone(), context, params);

        self.emit(AppEvent::MessageSent {
            session_id: session_id.to_string(),
        });

        let provider = self.provider.clone();
        let sessions = self.sessions.clone();
        let event_tx = self.event_tx.clone();

        let task = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = provider.generate(request).await;
            debug!("Generation finished in {:.1?}", started.elapsed());

            let (outcome, usage) = match result {
                Ok(response) => {
                    let _ = event_tx.send(AppEvent::ReplyGenerated {
                        session_id: session_id.to_string(),
                        input_tokens: response.usage.input_tokens,
                        output_tokens: response.usage.output_tokens,
                    });
                    let outcome = ReplyOutcome::Generated {
                        reply: sanitize_content(&response.reply),
                        context: response.context,
                    };
                    (outcome, Some(response.usage))
                }
                Err(e) if e.is_unavailable() => {
                    sessions
                        .with_session(&session_id, |s| s.abort_exchange(ticket))
                        .await;
                    let _ = event_tx.send(AppEvent::Error { error: e.to_string() });
                    return Err(ChatError::ModelUnavailable(e.to_string()));
                }
                Err(e) => {
                    let _ = event_tx.send(AppEvent::GenerationFailed {
                        session_id: session_id.to_string(),
                        error: e.to_string(),
                    });
                    let outcome = ReplyOutcome::Failed {
                        reply: format!("Sorry, I encountered an error: {}", e),
                    };
                    (outcome, None)
                }
            };

            let failed = matches!(outcome, ReplyOutcome::Failed { .. });
            let reply = outcome.reply().to_string();
            let recorded = sessions
                .with_session(&session_id, |s| s.finish_exchange(ticket, &text, outcome))
                .await
                .ok_or(ChatError::SessionNotFound(session_id))?;

            Ok(ExchangeOutcome {
                session_id,
                reply,
                failed,
                recorded,
                usage,
            })
        });

        task.await
            .map_err(|e| ChatError::Internal(format!("generation task failed: {}", e)))?
    }

    /// Forget the conversation and the model context of a session
    pub async fn clear(&self, session_id: Uuid) -> ChatResult<()> {
        self.sessions
            .with_session(&session_id, |s| s.clear())
            .await
            .ok_or(ChatError::SessionNotFound(session_id))?;
        self.emit(AppEvent::SessionCleared {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Displayed history of a session, oldest first
    pub async fn history(&self, session_id: Uuid) -> ChatResult<Vec<Turn>> {
        self.sessions
            .read(&session_id, |s| s.conversation.turns().to_vec())
            .await
            .ok_or(ChatError::SessionNotFound(session_id))
    }

    /// When the session was started
    pub async fn created_at(&self, session_id: Uuid) -> ChatResult<DateTime<Utc>> {
        self.sessions
            .read(&session_id, |s| s.created_at)
            .await
            .ok_or(ChatError::SessionNotFound(session_id))
    }

    pub async fn stats(&self, session_id: Uuid) -> ChatResult<ConversationStats> {
        self.sessions
            .read(&session_id, |s| s.conversation.stats())
            .await
            .ok_or(ChatError::SessionNotFound(session_id))
    }

    pub async fn model_status(&self) -> ModelStatus {
        let ready = match self.provider.health_check().await {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Health check failed: {}", e);
                false
            }
        };
        ModelStatus {
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            ready,
        }
    }

    /// Drop sessions idle for longer than the configured TTL
    pub async fn prune_idle(&self) -> usize {
        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let count = self.sessions.prune_idle(ttl).await;
        if count > 0 {
            self.emit(AppEvent::SessionsPruned { count });
        }
        count
    }

    /// Periodically prune idle sessions for as long as the app is alive
    pub fn spawn_pruner(self: &Arc<Self>) -> JoinHandle<()> {
        let app = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                match app.upgrade() {
                    Some(app) => {
                        app.prune_idle().await;
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationResponse, LlmError, LlmResult, DIALOGPT_EOS_TOKEN_ID};
    use crate::session::Speaker;
    use async_trait::async_trait;

    fn echo_config() -> Config {
        let mut config = Config::default();
        config.provider = "echo".to_string();
        config.model = "echo".to_string();
        config.generation.do_sample = false;
        config
    }

    fn echo_app() -> App {
        App::new(echo_config())
    }

    /// Fails every call with the given error
    struct FailingProvider {
        unavailable: bool,
    }

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn generate(&self, _request: GenerationRequest) -> LlmResult<GenerationResponse> {
            if self.unavailable {
                Err(LlmError::ModelLoad("no weights".to_string()))
            } else {
                Err(LlmError::Generation("CUDA out of memory".to_string()))
            }
        }

        fn name(&self) -> &str {
            "failing"
        }

        fn model(&self) -> &str {
            "failing"
        }

        fn validate_config(&self) -> LlmResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_history_is_prior_plus_user_plus_reply() {
        let app = echo_app();
        let id = app.create_session().await;

        app.send_message(id, "Hello!", None).await.unwrap();
        let prior = app.history(id).await.unwrap();

        let outcome = app.send_message(id, "  How are you?  ", None).await.unwrap();
        let history = app.history(id).await.unwrap();

        assert_eq!(history.len(), prior.len() + 2);
        assert_eq!(&history[..prior.len()], prior.as_slice());
        assert_eq!(history[2].speaker, Speaker::User);
        assert_eq!(history[2].utterance, "How are you?");
        assert_eq!(history[3].speaker, Speaker::Bot);
        assert_eq!(history[3].utterance, outcome.reply);
        assert_eq!(outcome.reply, "You said: How are you?");
        assert!(outcome.recorded);
        assert!(!outcome.failed);
    }

    #[tokio::test]
    async fn test_context_grows_per_exchange() {
        let app = echo_app();
        let id = app.create_session().await;

        app.send_message(id, "one", None).await.unwrap();
        let first = app.stats(id).await.unwrap().context_tokens;
        app.send_message(id, "two", None).await.unwrap();
        let second = app.stats(id).await.unwrap().context_tokens;

        // "two" + EOS + "You said: two" + EOS
        assert_eq!(second - first, 3 + 1 + 13 + 1);

        let context = app
            .sessions()
            .read(&id, |s| s.conversation.context().cloned())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(context.turn_count(DIALOGPT_EOS_TOKEN_ID), 4);
    }

    #[tokio::test]
    async fn test_empty_and_oversized_messages_are_rejected() {
        let app = echo_app();
        let id = app.create_session().await;

        assert!(matches!(
            app.send_message(id, "   \n", None).await,
            Err(ChatError::EmptyMessage)
        ));

        let long = "a".repeat(app.config().max_message_chars + 1);
        assert!(matches!(
            app.send_message(id, &long, None).await,
            Err(ChatError::MessageTooLong { .. })
        ));
        assert!(app.history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let app = echo_app();
        let missing = Uuid::new_v4();
        assert!(matches!(
            app.send_message(missing, "hi", None).await,
            Err(ChatError::SessionNotFound(_))
        ));
        assert!(matches!(app.clear(missing).await, Err(ChatError::SessionNotFound(_))));
        assert!(matches!(app.created_at(missing).await, Err(ChatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_created_at_survives_activity_and_clear() {
        let app = echo_app();
        let before = Utc::now();
        let id = app.create_session().await;
        let created = app.created_at(id).await.unwrap();
        assert!(created >= before);

        app.send_message(id, "hi", None).await.unwrap();
        app.clear(id).await.unwrap();
        assert_eq!(app.created_at(id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_generation_failure_shows_apology_and_resets_context() {
        let app = App::with_provider(echo_config(), Arc::new(FailingProvider { unavailable: false }));
        let id = app.create_session().await;

        let outcome = app.send_message(id, "hi", None).await.unwrap();
        assert!(outcome.failed);
        assert_eq!(
            outcome.reply,
            "Sorry, I encountered an error: Generation failed: CUDA out of memory"
        );

        let history = app.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(app.stats(id).await.unwrap().context_tokens, 0);
    }

    #[tokio::test]
    async fn test_unavailable_model_appends_nothing() {
        let app = App::with_provider(echo_config(), Arc::new(FailingProvider { unavailable: true }));
        let id = app.create_session().await;

        let result = app.send_message(id, "hi", None).await;
        assert!(matches!(result, Err(ChatError::ModelUnavailable(_))));
        assert!(app.history(id).await.unwrap().is_empty());

        // The session is released for the next attempt
        assert!(!app.sessions().read(&id, |s| s.is_busy()).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_local_model_keeps_app_running() {
        let mut config = Config::default();
        config.provider = "dialogpt".to_string();
        config.model = "/nonexistent/dialogpt".to_string();
        let app = App::new(config);
        let id = app.create_session().await;

        assert!(matches!(
            app.send_message(id, "hi", None).await,
            Err(ChatError::ModelUnavailable(_))
        ));
        assert!(!app.model_status().await.ready);
    }

    #[tokio::test]
    async fn test_clear_resets_session() {
        let app = echo_app();
        let id = app.create_session().await;
        app.send_message(id, "hi", None).await.unwrap();
        app.clear(id).await.unwrap();

        let stats = app.stats(id).await.unwrap();
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.exchanges, 0);
        assert_eq!(stats.context_tokens, 0);
    }

    #[tokio::test]
    async fn test_max_length_override_is_clamped() {
        let app = echo_app();
        let id = app.create_session().await;
        // Clamped up to the minimum of 100, which still fits this exchange
        let outcome = app.send_message(id, "hi", Some(1)).await.unwrap();
        assert!(!outcome.failed);
        assert!(app.stats(id).await.unwrap().context_tokens <= 100);
    }

    #[tokio::test]
    async fn test_event_loop_runs_until_shutdown() {
        let app = echo_app();
        let handle = app.start_event_loop().await.unwrap();
        assert!(app.start_event_loop().await.is_err());

        app.create_session().await;
        app.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_session() {
        let app = echo_app();
        let id = app.resolve_session(None).await;
        assert_eq!(app.resolve_session(Some(id)).await, id);
        assert_ne!(app.resolve_session(Some(Uuid::new_v4())).await, id);
    }
}
