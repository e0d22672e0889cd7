use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::model::*;

/// Position in the booking dialog. Submission or abort clears the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogStep {
    SelectResource,
    SelectTime,
    EnterTopic,
    EnterParticipants,
}

/// Fields collected so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationDraft {
    pub resource_id: Option<ResourceId>,
    pub resource_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub span: Option<Span>,
    pub topic: Option<String>,
    pub participants: Vec<String>,
}

impl ReservationDraft {
    /// `None` until resource, date, span and topic are all set.
    pub fn to_request(&self, requester_id: RequesterId) -> Option<NewReservation> {
        Some(NewReservation {
            resource_id: self.resource_id?,
            requester_id,
            topic: self.topic.clone()?,
            date: self.date?,
            span: self.span?,
            participants: self.participants.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogSession {
    pub requester_id: RequesterId,
    pub step: DialogStep,
    pub draft: ReservationDraft,
    pub updated_at: DateTime<Utc>,
}

impl DialogSession {
    pub fn new(requester_id: RequesterId, now: DateTime<Utc>) -> Self {
        Self {
            requester_id,
            step: DialogStep::SelectResource,
            draft: ReservationDraft::default(),
            updated_at: now,
        }
    }

    /// True once the session has gone untouched for at least `max_idle`.
    pub fn is_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        (now - self.updated_at)
            .to_std()
            .is_ok_and(|idle| idle >= max_idle)
    }
}

/// Keyed storage behind the tracker.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, requester_id: RequesterId) -> Option<DialogSession>;
    async fn set(&self, session: DialogSession);
    /// Returns whether a session was removed.
    async fn clear(&self, requester_id: RequesterId) -> bool;
    /// Drop every session for which `keep` is false. Returns how many were dropped.
    async fn retain(&self, keep: &(dyn for<'s> Fn(&'s DialogSession) -> bool + Send + Sync)) -> usize;
    async fn len(&self) -> usize;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<RequesterId, DialogSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, requester_id: RequesterId) -> Option<DialogSession> {
        self.sessions.read().await.get(&requester_id).cloned()
    }

    async fn set(&self, session: DialogSession) {
        self.sessions
            .write()
            .await
            .insert(session.requester_id, session);
    }

    async fn clear(&self, requester_id: RequesterId) -> bool {
        self.sessions.write().await.remove(&requester_id).is_some()
    }

    async fn retain(&self, keep: &(dyn for<'s> Fn(&'s DialogSession) -> bool + Send + Sync)) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| keep(s));
        before - sessions.len()
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// In-progress booking dialogs keyed by requester. Sequencing of steps is up to the
/// caller; the tracker only stores what it is given.
#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()))
    }
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Begin a fresh dialog, replacing any existing one.
    pub async fn start(&self, requester_id: RequesterId) -> DialogSession {
        let session = DialogSession::new(requester_id, Utc::now());
        self.store.set(session.clone()).await;
        self.publish_len().await;
        debug!(requester = requester_id, "dialog started");
        session
    }

    pub async fn get(&self, requester_id: RequesterId) -> Option<DialogSession> {
        self.store.get(requester_id).await
    }

    /// Store `session` under `requester_id` and refresh its idle clock.
    pub async fn update(&self, requester_id: RequesterId, mut session: DialogSession) {
        session.requester_id = requester_id;
        session.updated_at = Utc::now();
        debug!(requester = requester_id, step = ?session.step, "dialog updated");
        self.store.set(session).await;
        self.publish_len().await;
    }

    pub async fn clear(&self, requester_id: RequesterId) -> bool {
        let removed = self.store.clear(requester_id).await;
        if removed {
            self.publish_len().await;
            debug!(requester = requester_id, "dialog cleared");
        }
        removed
    }

    /// Discard dialogs idle for `max_idle` or longer as of `now`.
    pub async fn evict_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let evicted = self
            .store
            .retain(&|s: &DialogSession| !s.is_idle(now, max_idle))
            .await;
        if evicted > 0 {
            metrics::counter!(crate::observability::SESSIONS_EVICTED_TOTAL).increment(evicted as u64);
            self.publish_len().await;
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn publish_len(&self) {
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.len().await as f64);
    }
}
