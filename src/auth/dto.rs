use serde::Deserialize;

/// Sign-in form body.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Registration form body.
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

/// Query of the login page; `registered` is set after a successful sign-up,
/// `timeout` when the page's inactivity timer ran out.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    pub registered: Option<String>,
    pub timeout: Option<String>,
}
