use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::storage::StoreResult;
use crate::tasks::repo_types::Task;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks of a user, newest first.
    async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Task>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>>;
    async fn create(&self, title: &str, description: Option<&str>, owner: &User)
        -> StoreResult<Task>;
    async fn update(&self, task: &Task) -> StoreResult<Task>;
    /// Deleting a missing id is not an error.
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    /// Returns the toggled task, or `None` when the id does not exist.
    async fn toggle_complete(&self, id: Uuid) -> StoreResult<Option<Task>>;
}

#[derive(Clone)]
pub struct PgTaskStore {
    db: PgPool,
}

impl PgTaskStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Task>> {
        debug!(%user_id, "finding tasks for user");
        let rows = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, user_id, title, description, completed, created_date, completed_date
            FROM tasks
            WHERE user_id = $1
            ORDER BY created_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(
            r#"
            SELECT id, user_id, title, description, completed, created_date, completed_date
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn create(
        &self,
        title: &str,
        description: Option<&str>,
        owner: &User,
    ) -> StoreResult<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (user_id, title, description, completed, created_date)
            VALUES ($1, $2, $3, FALSE, $4)
            RETURNING id, user_id, title, description, completed, created_date, completed_date
            "#,
        )
        .bind(owner.id)
        .bind(title)
        .bind(description)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.db)
        .await?;
        info!(task_id = %task.id, username = %owner.username, "task created");
        Ok(task)
    }

    async fn update(&self, task: &Task) -> StoreResult<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
               SET title = $2, description = $3, completed = $4, completed_date = $5
             WHERE id = $1
            RETURNING id, user_id, title, description, completed, created_date, completed_date
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.completed)
        .bind(task.completed_date)
        .fetch_one(&self.db)
        .await?;
        info!(task_id = %task.id, "task updated");
        Ok(task)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let done = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if done.rows_affected() > 0 {
            info!(task_id = %id, "task deleted");
        }
        Ok(())
    }

    async fn toggle_complete(&self, id: Uuid) -> StoreResult<Option<Task>> {
        // Right-hand sides see the pre-update row.
        let row = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
               SET completed = NOT completed,
                   completed_date = CASE WHEN completed THEN NULL
                                         ELSE COALESCE(completed_date, $2) END
             WHERE id = $1
            RETURNING id, user_id, title, description, completed, created_date, completed_date
            "#,
        )
        .bind(id)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.db)
        .await?;
        if let Some(task) = &row {
            info!(task_id = %id, completed = task.completed, "task completion toggled");
        }
        Ok(row)
    }
}

#[cfg(test)]
pub use memory::{FlakyTaskStore, MemoryTaskStore};

#[cfg(test)]
mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::storage::StoreError;
    use tokio::sync::RwLock;

    /// Process-local task store, used by `AppState::fake` and the tests.
    ///
    /// Entries keep an insertion sequence so tasks created within the same clock
    /// tick still come back newest first.
    #[derive(Default)]
    pub struct MemoryTaskStore {
        inner: RwLock<MemoryTasks>,
    }

    #[derive(Default)]
    struct MemoryTasks {
        next_seq: u64,
        rows: Vec<(u64, Task)>,
    }

    impl MemoryTaskStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl TaskStore for MemoryTaskStore {
        async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Task>> {
            let inner = self.inner.read().await;
            let mut rows: Vec<&(u64, Task)> =
                inner.rows.iter().filter(|(_, t)| t.user_id == user_id).collect();
            rows.sort_by(|(sa, a), (sb, b)| {
                b.created_date
                    .cmp(&a.created_date)
                    .then_with(|| sb.cmp(sa))
            });
            Ok(rows.into_iter().map(|(_, t)| t.clone()).collect())
        }

        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
            let inner = self.inner.read().await;
            Ok(inner.rows.iter().find(|(_, t)| t.id == id).map(|(_, t)| t.clone()))
        }

        async fn create(
            &self,
            title: &str,
            description: Option<&str>,
            owner: &User,
        ) -> StoreResult<Task> {
            let task = Task {
                id: Uuid::new_v4(),
                user_id: owner.id,
                title: title.to_string(),
                description: description.map(str::to_string),
                completed: false,
                created_date: OffsetDateTime::now_utc(),
                completed_date: None,
            };
            let mut inner = self.inner.write().await;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.rows.push((seq, task.clone()));
            Ok(task)
        }

        async fn update(&self, task: &Task) -> StoreResult<Task> {
            let mut inner = self.inner.write().await;
            let (_, slot) = inner
                .rows
                .iter_mut()
                .find(|(_, t)| t.id == task.id)
                .ok_or(StoreError::NotFound)?;
            // owner and creation time never change
            slot.title = task.title.clone();
            slot.description = task.description.clone();
            slot.completed = task.completed;
            slot.completed_date = task.completed_date;
            Ok(slot.clone())
        }

        async fn delete(&self, id: Uuid) -> StoreResult<()> {
            self.inner.write().await.rows.retain(|(_, t)| t.id != id);
            Ok(())
        }

        async fn toggle_complete(&self, id: Uuid) -> StoreResult<Option<Task>> {
            let mut inner = self.inner.write().await;
            let Some((_, task)) = inner.rows.iter_mut().find(|(_, t)| t.id == id) else {
                return Ok(None);
            };
            task.toggle(OffsetDateTime::now_utc());
            Ok(Some(task.clone()))
        }
    }

    /// Task store that can be switched into an outage.
    #[derive(Default)]
    pub struct FlakyTaskStore {
        inner: MemoryTaskStore,
        down: AtomicBool,
    }

    impl FlakyTaskStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> StoreResult<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TaskStore for FlakyTaskStore {
        async fn find_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Task>> {
            self.check()?;
            self.inner.find_by_user(user_id).await
        }

        async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Task>> {
            self.check()?;
            self.inner.find_by_id(id).await
        }

        async fn create(
            &self,
            title: &str,
            description: Option<&str>,
            owner: &User,
        ) -> StoreResult<Task> {
            self.check()?;
            self.inner.create(title, description, owner).await
        }

        async fn update(&self, task: &Task) -> StoreResult<Task> {
            self.check()?;
            self.inner.update(task).await
        }

        async fn delete(&self, id: Uuid) -> StoreResult<()> {
            self.check()?;
            self.inner.delete(id).await
        }

        async fn toggle_complete(&self, id: Uuid) -> StoreResult<Option<Task>> {
            self.check()?;
            self.inner.toggle_complete(id).await
        }
    }
}
