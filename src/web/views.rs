//! Page component trees.
//!
//! Every page is built as a tree of [`Component`]s. The tree is rendered to
//! HTML for the browser and walked by the audit middleware to find the
//! control that triggered a postback and the inputs whose values changed.

use std::fmt::Write as _;

use axum::response::Html;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

use crate::{
    session::{EditState, Message, Severity},
    tasks::repo_types::Task,
};

/// Request parameter naming the command button that submitted a form.
pub const SOURCE_PARAM: &str = "source";

const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// `idle_minutes` set on pages that watch for session inactivity.
    Page { title: String, idle_minutes: Option<i64> },
    Form { action: String },
    Group { class: &'static str },
    Heading,
    Text,
    Message { severity: Severity },
    InputText,
    InputSecret,
    InputTextarea,
    CommandButton { formaction: Option<String> },
    Link { href: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub id: String,
    pub kind: Kind,
    pub label: Option<String>,
    pub value: Option<String>,
    pub children: Vec<Component>,
}

impl Component {
    fn new(id: impl Into<String>, kind: Kind) -> Self {
        Self { id: id.into(), kind, label: None, value: None, children: Vec::new() }
    }

    pub fn page(title: impl Into<String>, idle_minutes: Option<i64>) -> Self {
        Self::new("page", Kind::Page { title: title.into(), idle_minutes })
    }

    pub fn form(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::new(id, Kind::Form { action: action.into() })
    }

    pub fn group(id: impl Into<String>, class: &'static str) -> Self {
        Self::new(id, Kind::Group { class })
    }

    pub fn heading(text: impl Into<String>) -> Self {
        Self::new("", Kind::Heading).with_value(text)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new("", Kind::Text).with_value(text)
    }

    pub fn message(message: &Message) -> Self {
        Self::new("", Kind::Message { severity: message.severity })
            .with_label(message.summary.clone())
            .with_value(message.detail.clone())
    }

    pub fn input(id: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(id, Kind::InputText).with_label(label).with_value(value)
    }

    pub fn secret(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, Kind::InputSecret).with_label(label).with_value("")
    }

    pub fn textarea(id: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(id, Kind::InputTextarea).with_label(label).with_value(value)
    }

    pub fn button(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(id, Kind::CommandButton { formaction: None }).with_label(label)
    }

    pub fn button_to(
        id: impl Into<String>,
        label: impl Into<String>,
        formaction: impl Into<String>,
    ) -> Self {
        Self::new(id, Kind::CommandButton { formaction: Some(formaction.into()) }).with_label(label)
    }

    pub fn link(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self::new("", Kind::Link { href: href.into() }).with_label(label)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn child(mut self, child: Component) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Component>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn is_command(&self) -> bool {
        matches!(self.kind, Kind::CommandButton { .. })
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, Kind::InputText | Kind::InputSecret | Kind::InputTextarea)
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.kind, Kind::InputSecret)
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            Kind::Page { .. } => "Page",
            Kind::Form { .. } => "Form",
            Kind::Group { .. } => "Group",
            Kind::Heading => "Heading",
            Kind::Text => "Text",
            Kind::Message { .. } => "Message",
            Kind::InputText => "InputText",
            Kind::InputSecret => "InputSecret",
            Kind::InputTextarea => "InputTextarea",
            Kind::CommandButton { .. } => "CommandButton",
            Kind::Link { .. } => "Link",
        }
    }

    /// Label, else value, else a placeholder.
    pub fn display_name(&self) -> &str {
        self.label
            .as_deref()
            .or(self.value.as_deref())
            .unwrap_or("No Label")
    }

    pub fn find(&self, id: &str) -> Option<&Component> {
        if !self.id.is_empty() && self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn render(&self) -> Html<String> {
        let mut out = String::with_capacity(2048);
        self.render_into(&mut out);
        Html(out)
    }

    fn render_into(&self, out: &mut String) {
        let label = self.label.as_deref().map(escape).unwrap_or_default();
        let value = self.value.as_deref().map(escape).unwrap_or_default();
        let id = escape(&self.id);
        match &self.kind {
            Kind::Page { title, idle_minutes } => {
                let _ = write!(
                    out,
                    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title>\
                     <style>{STYLE}</style></head><body>",
                    escape(title)
                );
                self.render_children(out);
                if let Some(minutes) = idle_minutes {
                    let _ = write!(out, "<script data-idle-minutes=\"{minutes}\">{SESSION_SCRIPT}</script>");
                }
                out.push_str("</body></html>");
            }
            Kind::Form { action } => {
                let _ = write!(out, "<form id=\"{id}\" method=\"post\" action=\"{}\">", escape(action));
                self.render_children(out);
                out.push_str("</form>");
            }
            Kind::Group { class } => {
                let _ = write!(out, "<div id=\"{id}\" class=\"{class}\">");
                self.render_children(out);
                out.push_str("</div>");
            }
            Kind::Heading => {
                let _ = write!(out, "<h1>{value}</h1>");
            }
            Kind::Text => {
                let _ = write!(out, "<p>{value}</p>");
            }
            Kind::Message { severity } => {
                let class = match severity {
                    Severity::Info => "msg info",
                    Severity::Error => "msg error",
                };
                let _ = write!(out, "<p class=\"{class}\"><strong>{label}</strong> {value}</p>");
            }
            Kind::InputText => {
                let _ = write!(
                    out,
                    "<label for=\"{id}\">{label}</label>\
                     <input type=\"text\" id=\"{id}\" name=\"{id}\" value=\"{value}\">"
                );
            }
            Kind::InputSecret => {
                let _ = write!(
                    out,
                    "<label for=\"{id}\">{label}</label>\
                     <input type=\"password\" id=\"{id}\" name=\"{id}\" value=\"\">"
                );
            }
            Kind::InputTextarea => {
                let _ = write!(
                    out,
                    "<label for=\"{id}\">{label}</label>\
                     <textarea id=\"{id}\" name=\"{id}\">{value}</textarea>"
                );
            }
            Kind::CommandButton { formaction } => {
                let formaction = formaction
                    .as_deref()
                    .map(|a| format!(" formaction=\"{}\"", escape(a)))
                    .unwrap_or_default();
                let _ = write!(
                    out,
                    "<button type=\"submit\" name=\"{SOURCE_PARAM}\" value=\"{id}\"{formaction}>{label}</button>"
                );
            }
            Kind::Link { href } => {
                let _ = write!(out, "<a href=\"{}\">{label}</a>", escape(href));
            }
        }
    }

    fn render_children(&self, out: &mut String) {
        for child in &self.children {
            child.render_into(out);
        }
    }
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_date(date: OffsetDateTime) -> String {
    date.format(DATE_FORMAT).unwrap_or_default()
}

fn messages(messages: &[Message]) -> Component {
    Component::group("messages", "messages").children(messages.iter().map(Component::message))
}

pub fn login_page(username: &str, notices: &[Message]) -> Component {
    Component::page("Sign in", None)
        .child(Component::heading("Sign in"))
        .child(messages(notices))
        .child(
            Component::form("loginForm", "/login")
                .child(Component::input("username", "Username", username))
                .child(Component::secret("password", "Password"))
                .child(Component::button("login", "Sign in")),
        )
        .child(Component::link("Create an account", "/register"))
}

#[derive(Debug, Default)]
pub struct RegisterFields<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
}

pub fn register_page(fields: &RegisterFields<'_>, notices: &[Message]) -> Component {
    Component::page("Create account", None)
        .child(Component::heading("Create account"))
        .child(messages(notices))
        .child(
            Component::form("registerForm", "/register")
                .child(Component::input("username", "Username", fields.username))
                .child(Component::secret("password", "Password"))
                .child(Component::input("email", "Email", fields.email))
                .child(Component::input("full_name", "Full name", fields.full_name))
                .child(Component::button("register", "Create account")),
        )
        .child(Component::link("Back to sign in", "/login"))
}

/// Everything the task page shows, borrowed from the session.
pub struct TaskListView<'a> {
    pub display_name: &'a str,
    pub tasks: &'a [Task],
    pub edit_state: EditState,
    pub draft_title: &'a str,
    pub draft_description: &'a str,
    pub messages: &'a [Message],
    /// Server-side idle timeout, drives the expiry warning.
    pub idle_minutes: i64,
}

pub fn task_list_page(view: &TaskListView<'_>) -> Component {
    let (legend, save_label, secondary) = match view.edit_state {
        EditState::Idle => (
            "New task",
            "Add task",
            Component::button_to("clear", "Clear", "/tasks/new"),
        ),
        EditState::Editing(_) => (
            "Edit task",
            "Update task",
            Component::button_to("cancel", "Cancel", "/tasks/cancel"),
        ),
    };

    let editor = Component::form("taskForm", "/tasks/save")
        .child(Component::text(legend))
        .child(Component::input("title", "Title", view.draft_title))
        .child(Component::textarea("description", "Description", view.draft_description))
        .child(Component::button("save", save_label))
        .child(secondary);

    let rows = view.tasks.iter().map(task_row);
    let list = if view.tasks.is_empty() {
        Component::group("tasks", "tasks").child(Component::text("No tasks yet."))
    } else {
        Component::group("tasks", "tasks").children(rows)
    };

    Component::page("Tasks", Some(view.idle_minutes))
        .child(Component::heading(format!("Tasks for {}", view.display_name)))
        .child(Component::form("logoutForm", "/logout").child(Component::button("logout", "Sign out")))
        .child(messages(view.messages))
        .child(editor)
        .child(list)
}

fn task_row(task: &Task) -> Component {
    let class = if task.completed { "task done" } else { "task" };
    let mut dates = format!("Created {}", format_date(task.created_date));
    if let Some(done) = task.completed_date {
        let _ = write!(dates, " · completed {}", format_date(done));
    }
    let toggle_label = if task.completed { "Reopen" } else { "Complete" };

    let mut row = Component::group(format!("task-{}", task.id), class)
        .child(Component::text(task.title.clone()).with_label("title"));
    if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
        row = row.child(Component::text(description));
    }
    row.child(Component::text(dates)).child(
        Component::form(format!("taskActions-{}", task.id), format!("/tasks/{}/toggle", task.id))
            .child(Component::button(format!("toggle-{}", task.id), toggle_label))
            .child(Component::button_to(
                format!("edit-{}", task.id),
                "Edit",
                format!("/tasks/{}/select", task.id),
            ))
            .child(Component::button_to(
                format!("delete-{}", task.id),
                "Delete",
                format!("/tasks/{}/delete", task.id),
            )),
    )
}

const STYLE: &str = "body{font-family:sans-serif;max-width:42rem;margin:2rem auto}\
label{display:block;margin-top:.5rem}input,textarea{width:100%}\
.task{border-bottom:1px solid #ddd;padding:.5rem 0}.task.done p:first-child{text-decoration:line-through}\
.msg.error{color:#b00020}.msg.info{color:#1b5e20}\
.timeout-overlay{display:none;position:fixed;inset:0;background:rgba(0,0,0,.5);z-index:1000}\
.timeout-box{background:#fff;max-width:24rem;margin:20vh auto;padding:1.5rem;border-radius:6px}\
.timeout-box h3{margin-top:0;color:#b00020}";

// Client side of the idle timeout: pings keep-alive while the user is
// active, warns with a countdown before the server would drop the session,
// and sends the browser to the login page once it has. Coming back to the
// page through history (bfcache restore or popstate) logs out.
const SESSION_SCRIPT: &str = r#"(function(){
var el=document.currentScript;
var idleMs=Number((el&&el.dataset.idleMinutes)||30)*60000;
var warnMs=Math.min(5*60000,idleMs/2);
var last=Date.now(),active=false,leaving=false,dialog=null;
function post(url){return fetch(url,{method:'POST',credentials:'same-origin'});}
function clock(ms){var s=Math.max(0,Math.ceil(ms/1000)),m=Math.floor(s/60);s=s%60;return m+':'+(s<10?'0':'')+s;}
function hide(){if(dialog){dialog.style.display='none';}}
function touch(){last=Date.now();active=true;hide();}
function expire(){if(leaving){return;}leaving=true;location.replace('/login?timeout=1');}
function logout(){if(leaving){return;}leaving=true;var go=function(){location.replace('/login');};post('/session/logout').then(go,go);}
function build(){
dialog=document.createElement('div');
dialog.id='sessionTimeoutDialog';
dialog.className='timeout-overlay';
dialog.innerHTML='<div class="timeout-box"><h3>Session Timeout Warning</h3>'+
'<p>Your session will expire due to inactivity in <strong id="sessionCountdown"></strong>.</p>'+
'<button type="button" id="stayLoggedIn">Stay Logged In</button> '+
'<button type="button" id="logoutNow">Logout Now</button></div>';
document.body.appendChild(dialog);
document.getElementById('stayLoggedIn').addEventListener('click',function(){touch();active=false;post('/session/keepalive');});
document.getElementById('logoutNow').addEventListener('click',logout);
}
function tick(){
var left=idleMs-(Date.now()-last);
if(left<=0){expire();return;}
if(left<=warnMs){if(!dialog){build();}dialog.style.display='block';document.getElementById('sessionCountdown').textContent=clock(left);}
}
['mousedown','mousemove','keypress','scroll','touchstart','click'].forEach(function(e){document.addEventListener(e,function(){if(!dialog||dialog.style.display==='none'){touch();}},true);});
setInterval(tick,1000);
setInterval(function(){if(active){active=false;post('/session/keepalive');}},60000);
window.addEventListener('pageshow',function(e){if(e.persisted){logout();}});
window.addEventListener('load',function(){setTimeout(function(){
history.pushState({todos:true},'',location.href);
window.addEventListener('popstate',logout);
},2000);});
})();"#;
