use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub idle_minutes: i64,
    pub max_age_minutes: i64,
    pub cookie_name: String,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub session: SessionConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET")?,
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "todos".into()),
            audience: std::env::var("SESSION_AUDIENCE").unwrap_or_else(|_| "todos-web".into()),
            idle_minutes: env_or("SESSION_IDLE_MINUTES", 30),
            max_age_minutes: env_or("SESSION_MAX_AGE_MINUTES", 60 * 12),
            cookie_name: std::env::var("SESSION_COOKIE")
                .unwrap_or_else(|_| "todos_session".into()),
            secure_cookie: env_or("SESSION_COOKIE_SECURE", false),
        };
        Ok(Self {
            database_url,
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            session,
        })
    }
}
