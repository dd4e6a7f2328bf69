//! In-memory session storage
//!
//! Sessions live only as long as the process and are dropped once idle for
//! longer than the configured TTL.

use chrono::{DateTime, Utc};
use std::{collections::HashMap, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::conversation::{Conversation, ReplyOutcome};
use crate::llm::ModelContext;

/// Proof that an exchange was started on a session. Only the holder of the
/// current ticket may record the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTicket {
    epoch: u64,
}

/// A browser (or terminal) session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub conversation: Conversation,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    in_flight: bool,
    epoch: u64,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation: Conversation::new(),
            created_at: now,
            last_active: now,
            in_flight: false,
            epoch: 0,
        }
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    /// Mark a generation as running and hand out the context to feed the
    /// model. Returns `None` when another exchange is still running.
    pub fn begin_exchange(&mut self) -> Option<(ExchangeTicket, Option<ModelContext>)> {
        if self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some((
            ExchangeTicket { epoch: self.epoch },
            self.conversation.context().cloned(),
        ))
    }

    /// Record the finished exchange. Returns `false` when the session was
    /// cleared while the model was running; the exchange is then dropped.
    pub fn finish_exchange(&mut self, ticket: ExchangeTicket, user_text: &str, outcome: ReplyOutcome) -> bool {
        if ticket.epoch != self.epoch {
            return false;
        }
        self.in_flight = false;
        self.conversation.record_exchange(user_text, outcome);
        true
    }

    /// Release the session without recording anything.
    pub fn abort_exchange(&mut self, ticket: ExchangeTicket) {
        if ticket.epoch == self.epoch {
            self.in_flight = false;
        }
    }

    /// Clear the conversation. Any running exchange is orphaned.
    pub fn clear(&mut self) {
        self.conversation.clear();
        self.in_flight = false;
        self.epoch += 1;
    }
}

/// Sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new, empty session
    pub async fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        debug!("Session created: {}", id);
        id
    }

    /// Reuse `id` when it names a live session, otherwise start a new one.
    /// The flag tells whether a session was created.
    pub async fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, bool) {
        if let Some(id) = id {
            if let Some(session) = self.sessions.write().await.get_mut(&id) {
                session.touch();
                return (id, false);
            }
        }
        (self.create().await, true)
    }

    /// Run `f` on a session, marking it active
    pub async fn with_session<R, F>(&self, id: &Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(id).map(|session| {
            session.touch();
            f(session)
        })
    }

    /// Read a session without marking it active
    pub async fn read<R, F>(&self, id: &Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&Session) -> R,
    {
        self.sessions.read().await.get(id).map(f)
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drop sessions idle for longer than `ttl`. Sessions waiting on the
    /// model are kept.
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let cutoff = Utc::now().checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.is_busy() || session.last_active >= cutoff);
        let removed = before - sessions.len();

        if removed > 0 {
            info!("Pruned {} idle sessions", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated(reply: &str) -> ReplyOutcome {
        ReplyOutcome::Generated {
            reply: reply.to_string(),
            context: ModelContext::new(vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_get_or_create() {
        let store = SessionStore::new();
        let (id, created) = store.get_or_create(None).await;
        assert!(created);

        let (same, created) = store.get_or_create(Some(id)).await;
        assert_eq!(same, id);
        assert!(!created);

        let (other, created) = store.get_or_create(Some(Uuid::new_v4())).await;
        assert_ne!(other, id);
        assert!(created);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_exchange_lifecycle() {
        let store = SessionStore::new();
        let id = store.create().await;

        let (ticket, context) = store
            .with_session(&id, |s| s.begin_exchange())
            .await
            .unwrap()
            .unwrap();
        assert!(context.is_none());

        // A second exchange cannot start while the first is running
        let second = store.with_session(&id, |s| s.begin_exchange()).await.unwrap();
        assert!(second.is_none());

        let recorded = store
            .with_session(&id, |s| s.finish_exchange(ticket, "hi", generated("hello")))
            .await
            .unwrap();
        assert!(recorded);

        let (turns, busy) = store
            .read(&id, |s| (s.conversation.turns().len(), s.is_busy()))
            .await
            .unwrap();
        assert_eq!(turns, 2);
        assert!(!busy);
    }

    #[tokio::test]
    async fn test_clear_orphans_running_exchange() {
        let store = SessionStore::new();
        let id = store.create().await;

        let (ticket, _) = store
            .with_session(&id, |s| s.begin_exchange())
            .await
            .unwrap()
            .unwrap();
        store.with_session(&id, |s| s.clear()).await;

        let recorded = store
            .with_session(&id, |s| s.finish_exchange(ticket, "hi", generated("late")))
            .await
            .unwrap();
        assert!(!recorded);
        assert!(store.read(&id, |s| s.conversation.is_empty()).await.unwrap());
    }

    #[tokio::test]
    async fn test_abort_releases_session() {
        let store = SessionStore::new();
        let id = store.create().await;
        let (ticket, _) = store
            .with_session(&id, |s| s.begin_exchange())
            .await
            .unwrap()
            .unwrap();
        store.with_session(&id, |s| s.abort_exchange(ticket)).await;
        assert!(!store.read(&id, |s| s.is_busy()).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_idle() {
        let store = SessionStore::new();
        let idle = store.create().await;
        let busy = store.create().await;
        store.with_session(&busy, |s| s.begin_exchange()).await;

        store
            .with_session(&idle, |s| s.last_active = Utc::now() - chrono::Duration::hours(2))
            .await;
        store
            .with_session(&busy, |s| s.last_active = Utc::now() - chrono::Duration::hours(2))
            .await;
        let fresh = store.create().await;

        let removed = store.prune_idle(Duration::from_secs(3600)).await;
        assert_eq!(removed, 1);
        assert!(store.read(&idle, |_| ()).await.is_none());
        assert!(store.read(&busy, |_| ()).await.is_some());
        assert!(store.read(&fresh, |_| ()).await.is_some());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SessionStore::new();
        let id = store.create().await;
        assert!(store.remove(&id).await);
        assert!(!store.remove(&id).await);
        assert!(store.is_empty().await);
    }
}
