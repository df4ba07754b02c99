use serde::Deserialize;

/// Fields of the task editor form; every postback of the task page carries
/// them, whichever button was pressed.
#[derive(Debug, Default, Deserialize)]
pub struct TaskForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: Option<String>,
}
