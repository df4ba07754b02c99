use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::auth::password::{hash_password, verify_password, PasswordError};
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, User};
use crate::session::{Session, SessionStore};
use crate::state::AppState;
use crate::storage::StoreError;

pub const USERNAME_MAX_LEN: usize = 100;
pub const PASSWORD_MIN_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Where the browser goes after an authentication step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    TaskList,
    Login,
}

impl Navigation {
    pub fn path(self) -> &'static str {
        match self {
            Navigation::TaskList => "/tasks",
            Navigation::Login => "/login",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown account")]
    UnknownAccount,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is locked")]
    AccountLocked,
    #[error("authentication failed: {0}")]
    Failure(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Text shown on the login page.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::UnknownAccount => "Unknown account".into(),
            AuthError::InvalidCredentials => "Invalid username or password".into(),
            AuthError::AccountLocked => "Account is locked".into(),
            AuthError::Failure(reason) => format!("Authentication failed: {reason}"),
            AuthError::Store(_) => "Sign-in is temporarily unavailable".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("username already taken")]
    Conflict,
    #[error("could not store password: {0}")]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegisterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => RegisterError::Conflict,
            other => RegisterError::Store(other),
        }
    }
}

/// Validates credentials and binds or clears the session principal.
///
/// Every operation takes the caller's session explicitly.
pub struct Authenticator<'a> {
    users: &'a dyn UserStore,
    sessions: &'a SessionStore,
}

impl<'a> Authenticator<'a> {
    pub fn new(users: &'a dyn UserStore, sessions: &'a SessionStore) -> Self {
        Self { users, sessions }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(state.users.as_ref(), &state.sessions)
    }

    pub async fn login(
        &self,
        session: &mut Session,
        username: &str,
        password: &str,
    ) -> Result<Navigation, AuthError> {
        let username = username.trim();
        info!(%username, "attempting login");
        if username.is_empty() {
            warn!("login rejected: empty username");
            return Err(AuthError::Failure("empty usernames are not allowed".into()));
        }

        let Some(user) = self.users.find_by_username(username).await? else {
            warn!(%username, "login failed: unknown account");
            return Err(AuthError::UnknownAccount);
        };

        match verify_password(password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => {
                warn!(%username, user_id = %user.id, "login failed: incorrect credentials");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                warn!(%username, error = %e, "login failed: unreadable credentials");
                return Err(AuthError::Failure("stored credentials are unreadable".into()));
            }
        }

        if user.locked {
            warn!(%username, "login failed: locked account");
            return Err(AuthError::AccountLocked);
        }

        info!(%username, user_id = %user.id, "login successful");
        session.bind_principal(user);
        Ok(Navigation::TaskList)
    }

    /// Clears the session and drops it from the registry. Harmless when
    /// nobody is logged in.
    pub async fn logout(&self, session: &mut Session) -> Navigation {
        match session.principal() {
            Some(username) => info!(%username, "logging out"),
            None => debug!("logout without an authenticated principal"),
        }
        session.clear_identity();
        session.take_messages();
        self.sessions.invalidate(session.id).await;
        Navigation::Login
    }

    /// True when a principal is bound; reloads the cached user if missing.
    pub async fn is_authenticated(&self, session: &mut Session) -> bool {
        let Some(username) = session.principal().map(str::to_owned) else {
            return false;
        };
        if session.user().is_some() {
            return true;
        }
        match self.users.find_by_username(&username).await {
            Ok(Some(user)) => {
                debug!(%username, "reloaded user for authenticated session");
                session.cache_user(user);
                true
            }
            Ok(None) => {
                warn!(%username, "principal no longer exists; clearing session");
                session.clear_identity();
                false
            }
            Err(e) => {
                warn!(%username, error = %e, "could not reload session user");
                true
            }
        }
    }

    pub fn keep_alive(&self, session: &mut Session) {
        if session.principal().is_some() {
            session.touch(OffsetDateTime::now_utc());
            debug!(session_id = %session.id, "session kept alive");
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
        full_name: &str,
    ) -> Result<User, RegisterError> {
        let username = username.trim();
        let email = email.trim().to_lowercase();

        if username.is_empty() {
            return Err(RegisterError::Invalid("Username is required"));
        }
        if username.chars().count() > USERNAME_MAX_LEN {
            return Err(RegisterError::Invalid("Username is too long"));
        }
        if !is_valid_email(&email) {
            warn!(%email, "invalid email");
            return Err(RegisterError::Invalid("Invalid email"));
        }
        if password.chars().count() < PASSWORD_MIN_LEN {
            warn!("password too short");
            return Err(RegisterError::Invalid("Password too short"));
        }

        let password_hash = hash_password(password)?;
        let user = self
            .users
            .create(NewUser {
                username: username.to_string(),
                password_hash,
                email,
                full_name: full_name.trim().to_string(),
            })
            .await?;
        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }
}
