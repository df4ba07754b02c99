use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::claims::SessionClaims, config::SessionConfig, state::AppState};

/// Signs and verifies the session cookie value.
#[derive(Clone)]
pub struct SessionKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub max_age: Duration,
    pub cookie_name: String,
    pub secure_cookie: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        SessionKeys::from_config(&state.config.session)
    }
}

impl SessionKeys {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            max_age: Duration::from_secs((cfg.max_age_minutes.max(1) as u64) * 60),
            cookie_name: cfg.cookie_name.clone(),
            secure_cookie: cfg.secure_cookie,
        }
    }

    pub fn sign(&self, sid: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.max_age.as_secs() as i64);
        let claims = SessionClaims {
            sid,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(%sid, "session token signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// `Set-Cookie` value carrying a freshly signed token for `sid`.
    pub fn issue_cookie(&self, sid: Uuid) -> anyhow::Result<String> {
        let token = self.sign(sid)?;
        Ok(format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.cookie_name,
            token,
            self.max_age.as_secs(),
            if self.secure_cookie { "; Secure" } else { "" }
        ))
    }

    pub fn clear_cookie(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            self.cookie_name,
            if self.secure_cookie { "; Secure" } else { "" }
        )
    }

    /// Finds this app's cookie in a `Cookie` request header value.
    pub fn cookie_value<'a>(&self, header: &'a str) -> Option<&'a str> {
        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == self.cookie_name && !value.is_empty()).then_some(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(secret: &str, issuer: &str) -> SessionKeys {
        SessionKeys::from_config(&SessionConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: "test-aud".into(),
            idle_minutes: 30,
            max_age_minutes: 60,
            cookie_name: "sid".into(),
            secure_cookie: false,
        })
    }

    #[test]
    fn sign_and_verify_session_token() {
        let keys = keys("dev-secret", "test-issuer");
        let sid = Uuid::new_v4();
        let token = keys.sign(sid).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sid, sid);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn verify_rejects_other_secret_or_issuer() {
        let token = keys("secret-a", "iss").sign(Uuid::new_v4()).expect("sign");
        assert!(keys("secret-b", "iss").verify(&token).is_err());
        assert!(keys("secret-a", "other-iss").verify(&token).is_err());
        assert!(keys("secret-a", "iss").verify("not.a.token").is_err());
    }

    #[test]
    fn cookie_round_trip_through_headers() {
        let keys = keys("dev-secret", "iss");
        let sid = Uuid::new_v4();
        let set_cookie = keys.issue_cookie(sid).expect("cookie");
        assert!(set_cookie.starts_with("sid="));
        assert!(set_cookie.contains("HttpOnly"));

        let pair = set_cookie.split(';').next().unwrap();
        let header = format!("theme=dark; {pair}; other=1");
        let value = keys.cookie_value(&header).expect("cookie present");
        assert_eq!(keys.verify(value).unwrap().sid, sid);

        assert_eq!(keys.cookie_value("sid=; theme=dark"), None);
        assert!(keys.clear_cookie().contains("Max-Age=0"));
    }
}
