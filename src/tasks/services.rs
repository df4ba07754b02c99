//! Session task manager: the only code that changes a session's task
//! snapshot, selection or draft.
//!
//! Edit workflow:
//!
//! ```text
//! Idle --select_task--> Editing --save / update_task ok--> Idle
//!                       Editing --cancel_edit----------> Idle
//! Idle --save / create_task--> Idle (list grows, or draft kept on error)
//! ```
//!
//! Every mutation goes to the task store first and then reloads the
//! snapshot, so the session never shows state the store does not have.

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::auth::services::Authenticator;
use crate::session::Session;
use crate::state::AppState;
use crate::storage::StoreError;
use crate::tasks::repo::TaskStore;
use crate::tasks::repo_types::{Task, DESCRIPTION_MAX_LEN, TITLE_MAX_LEN};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("invalid {0}")]
    Validation(&'static str),
    #[error("no task selected")]
    NoSelection,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn user_message(&self) -> &'static str {
        match self {
            TaskError::NotAuthenticated => "Please sign in again",
            TaskError::Validation("title") => "Title is required and must be at most 500 characters",
            TaskError::Validation(_) => "Description must be at most 2000 characters",
            TaskError::NoSelection => "Select a task to edit first",
            TaskError::Store(_) => "Something went wrong, please try again",
        }
    }
}

fn validate(title: &str, description: &str) -> Result<(), TaskError> {
    if title.trim().is_empty() || title.chars().count() > TITLE_MAX_LEN {
        return Err(TaskError::Validation("title"));
    }
    if description.chars().count() > DESCRIPTION_MAX_LEN {
        return Err(TaskError::Validation("description"));
    }
    Ok(())
}

fn optional(description: &str) -> Option<&str> {
    let trimmed = description.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub struct TaskManager<'a> {
    tasks: &'a dyn TaskStore,
    auth: Authenticator<'a>,
}

impl<'a> TaskManager<'a> {
    pub fn new(tasks: &'a dyn TaskStore, auth: Authenticator<'a>) -> Self {
        Self { tasks, auth }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(state.tasks.as_ref(), Authenticator::from_state(state))
    }

    async fn current_user(&self, session: &mut Session) -> Result<User, TaskError> {
        if !self.auth.is_authenticated(session).await {
            return Err(TaskError::NotAuthenticated);
        }
        session.user().cloned().ok_or(TaskError::NotAuthenticated)
    }

    /// Task `id` if it exists and belongs to `user`.
    async fn owned(&self, user: &User, id: Uuid) -> Result<Option<Task>, TaskError> {
        Ok(self
            .tasks
            .find_by_id(id)
            .await?
            .filter(|task| task.user_id == user.id))
    }

    /// Replaces the snapshot with the store's current list; returns its size.
    pub async fn load_tasks(&self, session: &mut Session) -> Result<usize, TaskError> {
        if !self.auth.is_authenticated(session).await {
            warn!("cannot load tasks: not logged in");
            session.replace_snapshot(Vec::new());
            return Ok(0);
        }
        let Some(user_id) = session.user().map(|u| u.id) else {
            session.replace_snapshot(Vec::new());
            return Ok(0);
        };
        let tasks = self.tasks.find_by_user(user_id).await?;
        let count = tasks.len();
        session.replace_snapshot(tasks);
        info!(%user_id, count, "loaded tasks");
        Ok(count)
    }

    /// Loads the snapshot unless this session already has one.
    pub async fn ensure_loaded(&self, session: &mut Session) -> Result<(), TaskError> {
        if !session.has_snapshot() {
            debug!("task snapshot missing, loading");
            self.load_tasks(session).await?;
        }
        Ok(())
    }

    pub async fn create_task(
        &self,
        session: &mut Session,
        title: &str,
        description: &str,
    ) -> Result<usize, TaskError> {
        validate(title, description)?;
        let user = self.current_user(session).await?;
        info!(%title, username = %user.username, "adding task");
        let task = self
            .tasks
            .create(title.trim(), optional(description), &user)
            .await?;
        info!(task_id = %task.id, "task added");
        session.draft.clear();
        self.load_tasks(session).await
    }

    pub async fn update_task(&self, session: &mut Session) -> Result<(), TaskError> {
        let selected_id = session.selected().map(|t| t.id).ok_or(TaskError::NoSelection)?;
        let (title, description) = (session.draft.title.clone(), session.draft.description.clone());
        validate(&title, &description)?;
        let user = self.current_user(session).await?;

        // apply the draft to the stored row, not to the possibly stale selection
        let mut task = self
            .owned(&user, selected_id)
            .await?
            .ok_or(TaskError::Store(StoreError::NotFound))?;
        task.title = title.trim().to_string();
        task.description = optional(&description).map(str::to_string);
        self.tasks.update(&task).await?;
        info!(task_id = %task.id, "task updated");

        session.clear_edit();
        self.load_tasks(session).await?;
        Ok(())
    }

    /// Removes the task when present; returns whether anything was deleted.
    pub async fn delete_task(&self, session: &mut Session, id: Uuid) -> Result<bool, TaskError> {
        let user = self.current_user(session).await?;
        let removed = match self.owned(&user, id).await? {
            Some(task) => {
                self.tasks.delete(task.id).await?;
                info!(task_id = %id, "task deleted");
                if session.selected().is_some_and(|t| t.id == id) {
                    session.clear_edit();
                }
                true
            }
            None => {
                debug!(task_id = %id, "delete of unknown task ignored");
                false
            }
        };
        self.load_tasks(session).await?;
        Ok(removed)
    }

    pub async fn toggle_complete(
        &self,
        session: &mut Session,
        id: Uuid,
    ) -> Result<Option<bool>, TaskError> {
        let user = self.current_user(session).await?;
        let completed = match self.owned(&user, id).await? {
            Some(_) => self.tasks.toggle_complete(id).await?.map(|t| t.completed),
            None => None,
        };
        info!(task_id = %id, ?completed, "task completion toggled");
        self.load_tasks(session).await?;
        Ok(completed)
    }

    pub fn select_task(&self, session: &mut Session, task: &Task) {
        debug!(task_id = %task.id, "task selected for editing");
        session.select(task.clone());
    }

    pub fn cancel_edit(&self, session: &mut Session) {
        session.clear_edit();
    }

    pub fn prepare_create(&self, session: &mut Session) {
        session.clear_edit();
    }

    /// Single entry point for the dual-purpose form.
    pub async fn save(&self, session: &mut Session) -> Result<SaveOutcome, TaskError> {
        if session.selected().is_some() {
            self.update_task(session).await?;
            Ok(SaveOutcome::Updated)
        } else {
            let title = session.draft.title.clone();
            let description = session.draft.description.clone();
            let count = self.create_task(session, &title, &description).await?;
            Ok(SaveOutcome::Created { count })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created { count: usize },
    Updated,
}
