//! Request audit: logs page views, the control that triggered a form
//! postback and every input the user changed. Observes only; the request
//! body is forwarded byte for byte and responses pass through untouched.

use std::collections::HashMap;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, Method,
    },
    middleware::Next,
    response::Response,
};
use tracing::{debug, info, warn};

use crate::{
    auth::extractors::peek_session,
    session::Message,
    state::AppState,
    web::views::{login_page, register_page, task_list_page, Component, RegisterFields, TaskListView, SOURCE_PARAM},
};

const MAX_AUDITED_BODY: usize = 64 * 1024;
const MAX_DEPTH: usize = 32;
const MASK: &str = "********";

/// Page a postback to `path` was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    Register,
    Tasks,
}

impl View {
    pub fn for_postback(path: &str) -> Option<View> {
        match path {
            "/login" => Some(View::Login),
            "/register" => Some(View::Register),
            "/logout" => Some(View::Tasks),
            p if p.starts_with("/tasks") => Some(View::Tasks),
            _ => None,
        }
    }

    fn path(self) -> &'static str {
        match self {
            View::Login => "/login",
            View::Register => "/register",
            View::Tasks => "/tasks",
        }
    }
}

/// One input whose submitted value differs from what the page showed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub id: String,
    pub label: String,
    pub old: String,
    pub new: String,
}

/// Inputs present in `params` whose value changed. Secret inputs come back
/// masked.
pub fn changed_inputs(tree: &Component, params: &HashMap<String, String>) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    scan_for_changes(tree, params, 0, &mut changes);
    changes
}

fn scan_for_changes(
    component: &Component,
    params: &HashMap<String, String>,
    depth: usize,
    out: &mut Vec<FieldChange>,
) {
    if depth > MAX_DEPTH {
        return;
    }
    if component.is_input() {
        if let Some(submitted) = params.get(&component.id) {
            let old = component.value.as_deref().unwrap_or_default();
            if old != submitted {
                let (old, new) = if component.is_secret() {
                    (MASK.to_string(), MASK.to_string())
                } else {
                    (old.to_string(), submitted.clone())
                };
                out.push(FieldChange {
                    id: component.id.clone(),
                    label: component.display_name().to_string(),
                    old,
                    new,
                });
            }
        }
    }
    for child in &component.children {
        scan_for_changes(child, params, depth + 1, out);
    }
}

/// Rebuilds the component tree the browser was showing before the postback.
async fn pre_postback_tree(view: View, headers: &HeaderMap, state: &AppState) -> Option<Component> {
    match view {
        View::Login => Some(login_page("", &[])),
        View::Register => Some(register_page(&RegisterFields::default(), &[])),
        View::Tasks => {
            let handle = peek_session(headers, state).await?;
            let session = handle.lock().await;
            let tasks = session.tasks();
            let no_messages: [Message; 0] = [];
            let display_name = session.principal().unwrap_or_default().to_string();
            Some(task_list_page(&TaskListView {
                display_name: &display_name,
                tasks: &tasks,
                edit_state: session.edit_state(),
                draft_title: &session.draft.title,
                draft_description: &session.draft.description,
                messages: &no_messages,
                idle_minutes: state.config.session.idle_minutes,
            }))
        }
    }
}

async fn user_label(headers: &HeaderMap, state: &AppState) -> String {
    match peek_session(headers, state).await {
        Some(handle) => handle.lock().await.user_label(),
        None => String::new(),
    }
}

fn log_trigger_source(view: View, tree: &Component, params: &HashMap<String, String>, user: &str) {
    let Some(source) = params.get(SOURCE_PARAM) else {
        return;
    };
    match tree.find(source) {
        Some(control) if control.is_command() => info!(
            user,
            view = view.path(),
            control = control.kind_name(),
            label = control.display_name(),
            id = %control.id,
            "action triggered"
        ),
        _ => debug!(user, view = view.path(), %source, "postback from unknown control"),
    }
}

fn is_form_post(req: &Request) -> bool {
    req.method() == Method::POST
        && req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

/// Declared body size, when it is small enough to buffer.
fn auditable_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|len| *len <= MAX_AUDITED_BODY)
}

pub async fn observe(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    let req = if req.method() == Method::GET {
        let user = user_label(req.headers(), &state).await;
        debug!(%user, %path, "user is accessing view");
        req
    } else if is_form_post(&req) && auditable_length(req.headers()).is_some() {
        let (mut parts, body) = req.into_parts();
        let bytes = match to_bytes(body, MAX_AUDITED_BODY).await {
            Ok(bytes) => {
                if let Some(view) = View::for_postback(&path) {
                    audit_postback(view, &parts.headers, &bytes, &state).await;
                }
                bytes
            }
            Err(e) => {
                // the handler decides what an unreadable body means
                warn!(error = %e, %path, "could not read form body; not audited");
                parts.headers.remove(CONTENT_LENGTH);
                Bytes::new()
            }
        };
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    let res = next.run(req).await;

    let is_html = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));
    if is_html {
        debug!(%path, status = %res.status(), "rendering view");
    }
    res
}

async fn audit_postback(view: View, headers: &HeaderMap, body: &[u8], state: &AppState) {
    let params: HashMap<String, String> = url::form_urlencoded::parse(body).into_owned().collect();
    let user = user_label(headers, state).await;
    let Some(tree) = pre_postback_tree(view, headers, state).await else {
        debug!(%user, view = view.path(), "no view state for postback");
        return;
    };
    log_trigger_source(view, &tree, &params, &user);
    for change in changed_inputs(&tree, &params) {
        info!(
            %user,
            view = view.path(),
            field = %change.label,
            id = %change.id,
            old = %change.old,
            new = %change.new,
            "field changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http, http::StatusCode, middleware, routing::post, Router};
    use tower::ServiceExt;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn postback_paths_map_to_their_views() {
        assert_eq!(View::for_postback("/login"), Some(View::Login));
        assert_eq!(View::for_postback("/tasks/save"), Some(View::Tasks));
        assert_eq!(View::for_postback("/logout"), Some(View::Tasks));
        assert_eq!(View::for_postback("/session/keepalive"), None);
    }

    #[test]
    fn reports_changed_inputs_and_masks_secrets() {
        let tree = login_page("", &[]);
        let submitted = params(&[("username", "alice"), ("password", "hunter22"), ("source", "login")]);
        let changes = changed_inputs(&tree, &submitted);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].id, "username");
        assert_eq!(changes[0].old, "");
        assert_eq!(changes[0].new, "alice");
        assert_eq!(changes[1].id, "password");
        assert_eq!(changes[1].new, MASK);
    }

    #[test]
    fn unchanged_and_absent_inputs_are_skipped() {
        let tree = register_page(
            &RegisterFields { username: "bob", email: "", full_name: "" },
            &[],
        );
        let submitted = params(&[("username", "bob"), ("email", "")]);
        assert!(changed_inputs(&tree, &submitted).is_empty());
    }

    #[test]
    fn depth_bound_stops_the_walk() {
        let mut tree = Component::input("deep", "Deep", "");
        for i in 0..(MAX_DEPTH + 5) {
            tree = Component::group(format!("g{i}"), "g").child(tree);
        }
        let submitted = params(&[("deep", "x")]);
        assert!(changed_inputs(&tree, &submitted).is_empty());
    }

    #[tokio::test]
    async fn form_body_is_forwarded_unchanged() {
        let state = AppState::fake();
        let app = Router::new()
            .route("/login", post(|body: String| async move { body }))
            .layer(middleware::from_fn_with_state(state.clone(), observe))
            .with_state(state);

        let body = "username=alice&password=p%40ss&source=login";
        let res = app
            .oneshot(
                http::Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(CONTENT_LENGTH, body.len())
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let echoed = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&echoed[..], body.as_bytes());
    }

    #[tokio::test]
    async fn unreadable_body_still_reaches_the_handler() {
        let state = AppState::fake();
        let app = Router::new()
            .route("/tasks/save", post(|body: String| async move { format!("got {} bytes", body.len()) }))
            .layer(middleware::from_fn_with_state(state.clone(), observe))
            .with_state(state);

        // declared length passes the size check, the actual body overruns the buffer limit
        let oversized = "title=".to_string() + &"x".repeat(MAX_AUDITED_BODY + 1);
        let res = app
            .oneshot(
                http::Request::builder()
                    .method("POST")
                    .uri("/tasks/save")
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(CONTENT_LENGTH, 16)
                    .body(Body::from(oversized))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let text = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&text[..], b"got 0 bytes");
    }
}
