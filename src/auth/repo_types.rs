use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub email: String,
    pub full_name: String,
    pub locked: bool,
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a user; the id and timestamp come from the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub full_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            locked: false,
            created_at: OffsetDateTime::now_utc(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("argon2"));
    }
}
