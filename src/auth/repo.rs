use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};
use crate::storage::StoreResult;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    async fn update(&self, user: &User) -> StoreResult<User>;
    async fn delete(&self, id: Uuid) -> StoreResult<()>;
    async fn find_all(&self) -> StoreResult<Vec<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        debug!(%username, "finding user by username");
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, email, full_name, locked, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, email, full_name, locked, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, email, full_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, email, full_name, locked, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(&user.full_name)
        .fetch_one(&self.db)
        .await?;
        info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    async fn update(&self, user: &User) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET username = $2, password_hash = $3, email = $4, full_name = $5, locked = $6
             WHERE id = $1
            RETURNING id, username, password_hash, email, full_name, locked, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.locked)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let done = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        if done.rows_affected() > 0 {
            info!(user_id = %id, "user deleted");
        }
        Ok(())
    }

    async fn find_all(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, email, full_name, locked, created_at
            FROM users
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
pub use memory::{FlakyUserStore, MemoryUserStore};


#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            password_hash: "hash".into(),
            email: format!("{name}@example.com"),
            full_name: name.to_uppercase(),
        }
    }

    #[tokio::test]
    async fn create_then_find_by_username_and_id() {
        let store = MemoryUserStore::new();
        let created = store.create(new_user("alice")).await.expect("create");
        assert!(!created.locked);

        let by_name = store.find_by_username("alice").await.unwrap();
        assert_eq!(by_name.as_ref().map(|u| u.id), Some(created.id));
        let by_id = store.find_by_id(created.id).await.unwrap();
        assert_eq!(by_id.map(|u| u.username), Some("alice".to_string()));
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice")).await.expect("create");
        let err = store.create(new_user("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn update_delete_and_find_all() {
        let store = MemoryUserStore::new();
        let mut alice = store.create(new_user("alice")).await.unwrap();
        store.create(new_user("bob")).await.unwrap();

        alice.locked = true;
        alice.full_name = "Alice A.".into();
        let updated = store.update(&alice).await.expect("update");
        assert!(updated.locked);
        assert_eq!(updated.full_name, "Alice A.");

        store.delete(alice.id).await.expect("delete");
        store.delete(alice.id).await.expect("delete twice is fine");
        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].username, "bob");

        let err = store.update(&alice).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
