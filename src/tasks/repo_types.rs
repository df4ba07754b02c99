use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const TITLE_MAX_LEN: usize = 500;
pub const DESCRIPTION_MAX_LEN: usize = 2000;

/// Task record owned by exactly one user.
///
/// `completed_date` is `Some` exactly when `completed` is true; go through
/// [`Task::set_completed`] to keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub created_date: OffsetDateTime,
    pub completed_date: Option<OffsetDateTime>,
}

impl Task {
    pub fn set_completed(&mut self, completed: bool, now: OffsetDateTime) {
        self.completed = completed;
        if completed {
            self.completed_date.get_or_insert(now);
        } else {
            self.completed_date = None;
        }
    }

    pub fn toggle(&mut self, now: OffsetDateTime) {
        self.set_completed(!self.completed, now);
    }
}
