use axum::{
    extract::Request,
    http::{
        header::{
            CACHE_CONTROL, EXPIRES, PRAGMA, STRICT_TRANSPORT_SECURITY, VARY,
            X_CONTENT_TYPE_OPTIONS,
        },
        HeaderMap, HeaderName, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};
use tracing::trace;

const NO_STORE: &str = "no-cache, no-store, must-revalidate, max-age=0, private";
const HSTS: &str = "max-age=31536000; includeSubDomains";
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Header map whose cache-control headers are pinned to "do not store".
///
/// The pinned values are written by [`NoCacheHeaders::wrap`]; afterwards any
/// attempt to set or add `Cache-Control`, `Pragma` or `Expires` is dropped.
/// Header names are compared case-insensitively since `HeaderName` is
/// always lowercase.
#[derive(Debug, Clone)]
pub struct NoCacheHeaders {
    headers: HeaderMap,
}

fn is_pinned(name: &HeaderName) -> bool {
    name == CACHE_CONTROL || name == PRAGMA || name == EXPIRES
}

impl NoCacheHeaders {
    pub fn wrap(mut headers: HeaderMap) -> Self {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(EXPIRES, HeaderValue::from_static("0"));
        headers.insert(VARY, HeaderValue::from_static("*"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        Self { headers }
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if is_pinned(&name) {
            trace!(header = %name, "ignored attempt to override cache header");
            return;
        }
        self.headers.insert(name, value);
    }

    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        if is_pinned(&name) {
            trace!(header = %name, "ignored attempt to add cache header");
            return;
        }
        self.headers.append(name, value);
    }

    pub fn set_date_header(&mut self, name: HeaderName, date: OffsetDateTime) {
        if name == EXPIRES {
            return;
        }
        let formatted = date
            .to_offset(UtcOffset::UTC)
            .format(HTTP_DATE)
            .ok()
            .and_then(|s| HeaderValue::from_str(&s).ok());
        if let Some(value) = formatted {
            self.headers.insert(name, value);
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_inner(self) -> HeaderMap {
        self.headers
    }
}

fn is_secure(req: &Request) -> bool {
    req.uri().scheme_str() == Some("https")
        || req
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Middleware: every response leaves with the pinned no-cache headers, no
/// matter what the handler set.
pub async fn guard(req: Request, next: Next) -> Response {
    let secure = is_secure(&req);
    let mut res = next.run(req).await;

    let downstream = std::mem::take(res.headers_mut());
    let mut wrapped = NoCacheHeaders::wrap(HeaderMap::new());
    if secure {
        wrapped.set_header(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    }
    // `iter` yields every value of multi-valued headers such as Set-Cookie.
    for (name, value) in downstream.iter() {
        if name == VARY || name == X_CONTENT_TYPE_OPTIONS {
            continue;
        }
        wrapped.add_header(name.clone(), value.clone());
    }
    *res.headers_mut() = wrapped.into_inner();
    res
}
