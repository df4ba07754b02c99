use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{extractors::CurrentSession, services::Authenticator},
    session::{Message, Session},
    state::AppState,
    tasks::{
        dto::TaskForm,
        services::{SaveOutcome, TaskError, TaskManager},
    },
    web::views::{task_list_page, TaskListView},
};

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/save", post(save_task))
        .route("/tasks/new", post(new_task))
        .route("/tasks/cancel", post(cancel_edit))
        .route("/tasks/:id/select", post(select_task))
        .route("/tasks/:id/toggle", post(toggle_task))
        .route("/tasks/:id/delete", post(delete_task))
}

fn back_to_list() -> Response {
    Redirect::to("/tasks").into_response()
}

fn to_login() -> Response {
    Redirect::to("/login").into_response()
}

/// Queues the message for a failed operation; `NotAuthenticated` means the
/// caller has to sign in again.
fn report(session: &mut Session, err: TaskError, failed: &str) -> Response {
    match err {
        TaskError::NotAuthenticated => return to_login(),
        TaskError::Store(ref e) => {
            error!(error = %e, session_id = %session.id, "{failed}");
            session.push_message(Message::error("Error", failed));
        }
        ref other => {
            warn!(error = %other, "{failed}");
            session.push_message(Message::error("Error", other.user_message()));
        }
    }
    back_to_list()
}

/// Builds the task page for an authenticated session, consuming its flash
/// messages.
pub fn render_task_page(session: &mut Session, idle_minutes: i64) -> Html<String> {
    let messages = session.take_messages();
    let tasks = session.tasks();
    let display_name = session
        .user()
        .map(|u| if u.full_name.is_empty() { u.username.clone() } else { u.full_name.clone() })
        .unwrap_or_default();
    let draft = session.draft.clone();
    task_list_page(&TaskListView {
        display_name: &display_name,
        tasks: &tasks,
        edit_state: session.edit_state(),
        draft_title: &draft.title,
        draft_description: &draft.description,
        messages: &messages,
        idle_minutes,
    })
    .render()
}

#[instrument(skip(state, current), fields(session_id = %current.id))]
pub async fn list_tasks(State(state): State<AppState>, current: CurrentSession) -> Response {
    let mut session = current.handle.lock().await;
    if !Authenticator::from_state(&state).is_authenticated(&mut session).await {
        return to_login();
    }
    if let Err(e) = TaskManager::from_state(&state).load_tasks(&mut session).await {
        error!(error = %e, "failed to load tasks");
        session.push_message(Message::error("Error", "Failed to load tasks"));
    }
    render_task_page(&mut session, state.config.session.idle_minutes).into_response()
}

#[instrument(skip(state, current, form), fields(session_id = %current.id))]
pub async fn save_task(
    State(state): State<AppState>,
    current: CurrentSession,
    Form(form): Form<TaskForm>,
) -> Response {
    let mut session = current.handle.lock().await;
    debug!(source = ?form.source, "task form submitted");
    session.draft.title = form.title;
    session.draft.description = form.description;

    match TaskManager::from_state(&state).save(&mut session).await {
        Ok(SaveOutcome::Created { .. }) => {
            session.push_message(Message::info("Success", "Task added"));
            back_to_list()
        }
        Ok(SaveOutcome::Updated) => {
            session.push_message(Message::info("Success", "Task updated"));
            back_to_list()
        }
        Err(e) => {
            let failed = if session.selected().is_some() {
                "Failed to update task"
            } else {
                "Failed to add task"
            };
            report(&mut session, e, failed)
        }
    }
}

#[instrument(skip(state, current), fields(session_id = %current.id))]
pub async fn new_task(State(state): State<AppState>, current: CurrentSession) -> Response {
    let mut session = current.handle.lock().await;
    TaskManager::from_state(&state).prepare_create(&mut session);
    back_to_list()
}

#[instrument(skip(state, current), fields(session_id = %current.id))]
pub async fn cancel_edit(State(state): State<AppState>, current: CurrentSession) -> Response {
    let mut session = current.handle.lock().await;
    TaskManager::from_state(&state).cancel_edit(&mut session);
    back_to_list()
}

#[instrument(skip(state, current), fields(session_id = %current.id))]
pub async fn select_task(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(id): Path<Uuid>,
) -> Response {
    let mut session = current.handle.lock().await;
    let tm = TaskManager::from_state(&state);
    if let Err(e) = tm.ensure_loaded(&mut session).await {
        return report(&mut session, e, "Failed to load tasks");
    }
    let tasks = session.tasks();
    match tasks.iter().find(|t| t.id == id) {
        Some(task) => tm.select_task(&mut session, task),
        None => {
            warn!(task_id = %id, "selected task is not in the session's list");
            session.push_message(Message::error("Error", "Task not found"));
        }
    }
    back_to_list()
}

#[instrument(skip(state, current), fields(session_id = %current.id))]
pub async fn toggle_task(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(id): Path<Uuid>,
) -> Response {
    let mut session = current.handle.lock().await;
    match TaskManager::from_state(&state).toggle_complete(&mut session, id).await {
        Ok(_) => back_to_list(),
        Err(e) => report(&mut session, e, "Failed to update task"),
    }
}

#[instrument(skip(state, current), fields(session_id = %current.id))]
pub async fn delete_task(
    State(state): State<AppState>,
    current: CurrentSession,
    Path(id): Path<Uuid>,
) -> Response {
    let mut session = current.handle.lock().await;
    match TaskManager::from_state(&state).delete_task(&mut session, id).await {
        Ok(_) => {
            session.push_message(Message::info("Success", "Task deleted"));
            back_to_list()
        }
        Err(e) => report(&mut session, e, "Failed to delete task"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{
            self,
            header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
            StatusCode,
        },
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        app::build_app,
        auth::repo::MemoryUserStore,
        session::Severity,
        storage::StoreError,
        tasks::repo::FlakyTaskStore,
    };

    fn location(res: &Response) -> &str {
        res.headers()[LOCATION].to_str().unwrap()
    }

    fn form_req(uri: &str, body: &str, cookie: Option<&str>) -> http::Request<Body> {
        let mut b = http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(CONTENT_LENGTH, body.len());
        if let Some(c) = cookie {
            b = b.header(COOKIE, c);
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn store_failures_queue_the_operation_message() {
        let mut session = Session::new();
        let res = report(
            &mut session,
            TaskError::Store(StoreError::Unavailable(sqlx::Error::PoolTimedOut)),
            "Failed to add task",
        );
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/tasks");

        let messages = session.take_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, Severity::Error);
        assert_eq!(messages[0].summary, "Error");
        assert_eq!(messages[0].detail, "Failed to add task");
    }

    #[test]
    fn validation_failures_explain_themselves() {
        let mut session = Session::new();
        let res = report(&mut session, TaskError::Validation("title"), "Failed to add task");
        assert_eq!(location(&res), "/tasks");
        let messages = session.take_messages();
        assert_eq!(messages[0].detail, TaskError::Validation("title").user_message());
    }

    #[test]
    fn lost_authentication_goes_to_login_without_a_message() {
        let mut session = Session::new();
        let res = report(&mut session, TaskError::NotAuthenticated, "Failed to delete task");
        assert_eq!(location(&res), "/login");
        assert!(session.take_messages().is_empty());
    }

    #[tokio::test]
    async fn outage_during_save_keeps_the_draft_on_the_page() {
        let tasks = Arc::new(FlakyTaskStore::new());
        let state = AppState::fake_with(Arc::new(MemoryUserStore::new()), tasks.clone());
        Authenticator::from_state(&state)
            .register("alice", "password123", "alice@example.com", "Alice")
            .await
            .expect("register alice");
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(form_req("/login", "username=alice&password=password123", None))
            .await
            .unwrap();
        let cookie = res.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();

        tasks.set_down(true);
        let res = app
            .clone()
            .oneshot(form_req("/tasks/save", "title=Buy+milk&description=&source=save", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(location(&res), "/tasks");

        tasks.set_down(false);
        let res = app
            .oneshot(
                http::Request::builder()
                    .uri("/tasks")
                    .header(COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("Failed to add task"));
        assert!(html.contains("value=\"Buy milk\""));
    }
}
