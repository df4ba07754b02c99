use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::COOKIE, request::Parts, HeaderMap},
    response::Redirect,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::token::SessionKeys,
    session::SessionHandle,
    state::AppState,
};

/// The caller's server-side session, resolved from the signed cookie.
///
/// Rejects with a redirect to the login page when the cookie is missing,
/// tampered with, expired, or names a session the registry no longer holds.
/// Use `Option<CurrentSession>` where anonymous callers are fine.
pub struct CurrentSession {
    pub id: Uuid,
    pub handle: SessionHandle,
}

/// Session id carried by the request's cookie, if it verifies.
pub fn session_id(headers: &HeaderMap, keys: &SessionKeys) -> Option<Uuid> {
    let token = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|h| keys.cookie_value(h))?;
    match keys.verify(token) {
        Ok(claims) => Some(claims.sid),
        Err(e) => {
            debug!(error = %e, "ignoring invalid session cookie");
            None
        }
    }
}

/// Looks the session up without refreshing its idle timer.
pub async fn peek_session(headers: &HeaderMap, state: &AppState) -> Option<SessionHandle> {
    let keys = SessionKeys::from_ref(state);
    let id = session_id(headers, &keys)?;
    state.sessions.peek(id).await
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let id = session_id(&parts.headers, &keys).ok_or(Redirect::to("/login"))?;
        let handle = state.sessions.get(id).await.ok_or_else(|| {
            debug!(session_id = %id, "no live session for cookie");
            Redirect::to("/login")
        })?;
        Ok(CurrentSession { id, handle })
    }
}
