use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of the signed session cookie. Only the server-side session id
/// travels to the browser; the user identity stays in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Registry key of the session.
    pub sid: Uuid,
    /// Issued-at and expiry, unix seconds.
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}
