use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginForm, LoginQuery, RegisterForm},
        extractors::CurrentSession,
        services::{AuthError, Authenticator, Navigation, RegisterError},
        token::SessionKeys,
    },
    session::{Message, Session},
    state::AppState,
    web::views::{login_page, register_page, RegisterFields},
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/login", get(login_form).post(login))
        .route("/register", get(register_form).post(register))
        .route("/logout", post(logout))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session/keepalive", post(keep_alive))
        .route("/session/logout", post(ajax_logout))
}

async fn is_signed_in(state: &AppState, current: &Option<CurrentSession>) -> bool {
    match current {
        Some(c) => {
            let mut session = c.handle.lock().await;
            Authenticator::from_state(state).is_authenticated(&mut session).await
        }
        None => false,
    }
}

#[instrument(skip(state, current))]
pub async fn home(State(state): State<AppState>, current: Option<CurrentSession>) -> Redirect {
    if is_signed_in(&state, &current).await {
        Redirect::to(Navigation::TaskList.path())
    } else {
        Redirect::to(Navigation::Login.path())
    }
}

#[instrument(skip(state, keys, current))]
pub async fn login_form(
    State(state): State<AppState>,
    State(keys): State<SessionKeys>,
    current: Option<CurrentSession>,
    Query(query): Query<LoginQuery>,
) -> Response {
    if query.timeout.is_some() {
        // the browser gave up on the session; the server follows
        if current.is_some() {
            info!("session ended after client inactivity timeout");
        }
        end_session(&state, current).await;
        let notice = Message::info("Session expired", "You were signed out after a period of inactivity");
        let page = login_page("", &[notice]).render();
        return ([(SET_COOKIE, keys.clear_cookie())], page).into_response();
    }
    if is_signed_in(&state, &current).await {
        return Redirect::to(Navigation::TaskList.path()).into_response();
    }
    let notices: Vec<Message> = query
        .registered
        .map(|_| Message::info("Account created", "You can sign in now"))
        .into_iter()
        .collect();
    login_page("", &notices).render().into_response()
}

#[instrument(skip(state, keys, current, form), fields(username = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    State(keys): State<SessionKeys>,
    current: Option<CurrentSession>,
    Form(form): Form<LoginForm>,
) -> Response {
    // always a fresh session id after sign-in
    let mut session = Session::new();
    let auth = Authenticator::from_state(&state);

    let nav = match auth.login(&mut session, &form.username, &form.password).await {
        Ok(nav) => nav,
        Err(e) => {
            let status = match e {
                AuthError::Store(ref err) => {
                    error!(error = %err, "user store unavailable during login");
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::UNAUTHORIZED,
            };
            let notice = Message::error("Login Failed", e.user_message());
            let page = login_page(&form.username, &[notice]).render();
            return (status, page).into_response();
        }
    };

    let cookie = match keys.issue_cookie(session.id) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "session token signing failed");
            let notice = Message::error("Login Failed", "Sign-in is temporarily unavailable");
            let page = login_page(&form.username, &[notice]).render();
            return (StatusCode::INTERNAL_SERVER_ERROR, page).into_response();
        }
    };

    if let Some(old) = current {
        state.sessions.invalidate(old.id).await;
    }
    let session_id = session.id;
    state.sessions.insert(session).await;
    info!(%session_id, "session started");

    ([(SET_COOKIE, cookie)], Redirect::to(nav.path())).into_response()
}

#[instrument]
pub async fn register_form() -> Response {
    register_page(&RegisterFields::default(), &[]).render().into_response()
}

#[instrument(skip(state, form), fields(username = %form.username))]
pub async fn register(State(state): State<AppState>, Form(form): Form<RegisterForm>) -> Response {
    let auth = Authenticator::from_state(&state);
    let result = auth
        .register(&form.username, &form.password, &form.email, &form.full_name)
        .await;

    let (status, detail) = match result {
        Ok(_) => return Redirect::to("/login?registered=1").into_response(),
        Err(RegisterError::Invalid(reason)) => (StatusCode::BAD_REQUEST, reason.to_string()),
        Err(RegisterError::Conflict) => {
            warn!("username already taken");
            (StatusCode::CONFLICT, "Username is already taken".to_string())
        }
        Err(e) => {
            error!(error = %e, "registration failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Registration is temporarily unavailable".to_string(),
            )
        }
    };

    let fields = RegisterFields {
        username: &form.username,
        email: &form.email,
        full_name: &form.full_name,
    };
    let page = register_page(&fields, &[Message::error("Registration failed", detail)]).render();
    (status, page).into_response()
}

async fn end_session(state: &AppState, current: Option<CurrentSession>) -> Navigation {
    match current {
        Some(c) => {
            let mut session = c.handle.lock().await;
            Authenticator::from_state(state).logout(&mut session).await
        }
        None => Navigation::Login,
    }
}

#[instrument(skip(state, keys, current))]
pub async fn logout(
    State(state): State<AppState>,
    State(keys): State<SessionKeys>,
    current: Option<CurrentSession>,
) -> Response {
    let nav = end_session(&state, current).await;
    ([(SET_COOKIE, keys.clear_cookie())], Redirect::to(nav.path())).into_response()
}

/// Background ping from the task page while the user is active.
#[instrument(skip(state, current))]
pub async fn keep_alive(State(state): State<AppState>, current: Option<CurrentSession>) -> StatusCode {
    let Some(c) = current else {
        return StatusCode::UNAUTHORIZED;
    };
    let mut session = c.handle.lock().await;
    let auth = Authenticator::from_state(&state);
    if !auth.is_authenticated(&mut session).await {
        return StatusCode::UNAUTHORIZED;
    }
    auth.keep_alive(&mut session);
    StatusCode::NO_CONTENT
}

/// Logout fired by the page when the browser restores it from history.
#[instrument(skip(state, keys, current))]
pub async fn ajax_logout(
    State(state): State<AppState>,
    State(keys): State<SessionKeys>,
    current: Option<CurrentSession>,
) -> Response {
    end_session(&state, current).await;
    (StatusCode::NO_CONTENT, [(SET_COOKIE, keys.clear_cookie())]).into_response()
}
