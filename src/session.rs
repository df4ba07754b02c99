//! Server-side session state and the registry that owns it.
//!
//! A [`Session`] is mutated only by requests of its own browser session:
//! the registry hands out `Arc<Mutex<Session>>`, so two requests of one
//! session are applied one after the other.

use std::{collections::HashMap, sync::Arc};

use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{auth::repo_types::User, tasks::repo_types::Task};

pub type SessionHandle = Arc<Mutex<Session>>;

/// Title/description backing the create/edit form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub title: String,
    pub description: String,
}

impl Draft {
    pub fn clear(&mut self) {
        self.title.clear();
        self.description.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// User-visible message shown once on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl Message {
    pub fn info(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { severity: Severity::Info, summary: summary.into(), detail: detail.into() }
    }

    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { severity: Severity::Error, summary: summary.into(), detail: detail.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Editing(Uuid),
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    principal: Option<String>,
    user: Option<User>,
    snapshot: Option<Arc<[Task]>>,
    selected: Option<Task>,
    pub draft: Draft,
    messages: Vec<Message>,
    last_access: OffsetDateTime,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            principal: None,
            user: None,
            snapshot: None,
            selected: None,
            draft: Draft::default(),
            messages: Vec::new(),
            last_access: OffsetDateTime::now_utc(),
        }
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Id of the cached user, or an empty string; used in log lines.
    pub fn user_label(&self) -> String {
        self.user.as_ref().map(|u| u.id.to_string()).unwrap_or_default()
    }

    pub(crate) fn bind_principal(&mut self, user: User) {
        self.principal = Some(user.username.clone());
        self.user = Some(user);
        self.snapshot = None;
        self.clear_edit();
    }

    pub(crate) fn cache_user(&mut self, user: User) {
        self.user = Some(user);
    }

    /// Simulates a session restored without its cached user.
    #[cfg(test)]
    pub(crate) fn forget_cached_user(&mut self) {
        self.user = None;
    }

    pub(crate) fn clear_identity(&mut self) {
        self.principal = None;
        self.user = None;
        self.snapshot = None;
        self.clear_edit();
    }

    /// Current snapshot; empty until the first load.
    pub fn tasks(&self) -> Arc<[Task]> {
        self.snapshot.clone().unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Replaces the snapshot with a new allocation; never edits in place.
    pub(crate) fn replace_snapshot(&mut self, tasks: Vec<Task>) {
        self.snapshot = Some(Arc::from(tasks));
    }

    pub fn selected(&self) -> Option<&Task> {
        self.selected.as_ref()
    }

    pub fn edit_state(&self) -> EditState {
        match &self.selected {
            Some(task) => EditState::Editing(task.id),
            None => EditState::Idle,
        }
    }

    pub(crate) fn select(&mut self, task: Task) {
        self.draft = Draft {
            title: task.title.clone(),
            description: task.description.clone().unwrap_or_default(),
        };
        self.selected = Some(task);
    }

    pub(crate) fn clear_edit(&mut self) {
        self.selected = None;
        self.draft.clear();
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_access = now;
    }

    #[cfg(test)]
    pub fn last_access(&self) -> OffsetDateTime {
        self.last_access
    }

    pub fn is_expired(&self, idle: Duration, now: OffsetDateTime) -> bool {
        now - self.last_access > idle
    }
}

/// Registry of live sessions keyed by session id.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
    idle: Duration,
}

impl SessionStore {
    pub fn new(idle: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle,
        }
    }

    pub async fn insert(&self, session: Session) -> SessionHandle {
        self.purge_expired().await;
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        let live = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id, handle.clone());
            sessions.len()
        };
        debug!(session_id = %id, live, "session registered");
        handle
    }

    /// Live session for `id`; an idle-expired session is evicted instead.
    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        let handle = self.sessions.read().await.get(&id).cloned()?;
        let now = OffsetDateTime::now_utc();
        let expired = {
            let mut session = handle.lock().await;
            let expired = session.is_expired(self.idle, now);
            if !expired {
                session.touch(now);
            }
            expired
        };
        if expired {
            info!(session_id = %id, "session expired");
            self.invalidate(id).await;
            return None;
        }
        Some(handle)
    }

    /// Same as [`get`](Self::get) without refreshing liveness.
    pub async fn peek(&self, id: Uuid) -> Option<SessionHandle> {
        let handle = self.sessions.read().await.get(&id).cloned()?;
        let live = !handle.lock().await.is_expired(self.idle, OffsetDateTime::now_utc());
        live.then_some(handle)
    }

    pub async fn invalidate(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(session_id = %id, "session invalidated");
        }
        removed
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn purge_expired(&self) {
        let now = OffsetDateTime::now_utc();
        let handles: Vec<(Uuid, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect();
        let mut stale = Vec::new();
        for (id, handle) in handles {
            // a session busy with a request is live by definition
            if let Ok(session) = handle.try_lock() {
                if session.is_expired(self.idle, now) {
                    stale.push(id);
                }
            }
        }
        if !stale.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &stale {
                sessions.remove(id);
            }
            debug!(count = stale.len(), "expired sessions purged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(title: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: title.into(),
            description: Some("details".into()),
            completed: false,
            created_date: OffsetDateTime::now_utc(),
            completed_date: None,
        }
    }

    #[test]
    fn select_and_clear_drive_edit_state() {
        let mut s = Session::new();
        assert_eq!(s.edit_state(), EditState::Idle);

        let t = task("Write report");
        s.select(t.clone());
        assert_eq!(s.edit_state(), EditState::Editing(t.id));
        assert_eq!(s.draft.title, "Write report");
        assert_eq!(s.draft.description, "details");

        s.clear_edit();
        assert_eq!(s.edit_state(), EditState::Idle);
        assert_eq!(s.draft, Draft::default());
    }

    #[test]
    fn snapshot_is_replaced_not_mutated() {
        let mut s = Session::new();
        assert!(!s.has_snapshot());
        assert!(s.tasks().is_empty());

        s.replace_snapshot(vec![task("A")]);
        let first = s.tasks();
        s.replace_snapshot(vec![task("A")]);
        let second = s.tasks();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn messages_are_taken_once() {
        let mut s = Session::new();
        s.push_message(Message::info("Success", "Task added"));
        assert_eq!(s.take_messages().len(), 1);
        assert!(s.take_messages().is_empty());
    }

    #[tokio::test]
    async fn store_get_touches_and_invalidate_removes() {
        let store = SessionStore::new(Duration::minutes(30));
        let session = Session::new();
        let id = session.id;
        store.insert(session).await;
        assert_eq!(store.len().await, 1);

        assert!(store.get(id).await.is_some());
        assert!(store.invalidate(id).await);
        assert!(!store.invalidate(id).await);
        assert!(store.get(id).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::minutes(30));
        let mut session = Session::new();
        session.touch(OffsetDateTime::now_utc() - Duration::minutes(31));
        let id = session.id;
        store.insert(session).await;

        assert!(store.peek(id).await.is_none());
        assert!(store.get(id).await.is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn insert_purges_expired_entries() {
        let store = SessionStore::new(Duration::minutes(30));
        let mut stale = Session::new();
        stale.touch(OffsetDateTime::now_utc() - Duration::hours(2));
        store.insert(stale).await;
        store.insert(Session::new()).await;
        assert_eq!(store.len().await, 1);
    }
}
