//! The session/token bridge.
//!
//! A caller proves itself with either the `X-Auth-Token` header or the
//! `session_id` cookie; the header wins when both are present. Both carry a
//! session identifier, which resolves through the session store to the auth
//! backend's token. Stream transports that cannot set custom headers may
//! embed the session identifier in the URL path instead.

use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;

use super::negotiate::{default_error_response, ReplyFormat};
use super::state::AppState;
use drover_core::error::GatewayError;
use drover_core::wire;

/// Read one cookie value out of the Cookie header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Resolve the caller's session id. The custom header is authoritative over
/// the cookie for the duration of the request.
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }
    cookie_value(headers, "session_id")
}

/// Proof of an authenticated session. The auth token is copied out of the
/// session record; by the time a handler sees this, the session lock has
/// already been released, so long-running engine calls never serialize
/// concurrent requests from the same session.
#[derive(Debug, Clone)]
pub struct Authed {
    pub session_id: String,
    pub token: String,
}

/// Resolve an authenticated session from request headers, copying the token
/// out from under the session lock.
pub async fn authed_from_headers(state: &AppState, headers: &HeaderMap) -> Option<Authed> {
    let session_id = session_id_from(headers)?;
    let token = state
        .sessions
        .token_for(&session_id)
        .await
        .filter(|t| !t.is_empty())?;
    Some(Authed { session_id, token })
}

/// The negotiated "please log in" response used when authentication fails on
/// a browser-facing resource.
pub fn login_redirect(headers: &HeaderMap) -> Response {
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    match wire::negotiate(accept) {
        Ok(format) => ReplyFormat(format).login_prompt(),
        Err(_) => default_error_response(&GatewayError::AuthRequired),
    }
}

impl axum::extract::FromRequestParts<Arc<AppState>> for Authed {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authed_from_headers(state, &parts.headers)
            .await
            .ok_or_else(|| login_redirect(&parts.headers))
    }
}

/// Resolve and verify the auth token for a stream connection. `path_token`
/// is the URL-embedded session id workaround for browser `EventSource`
/// clients; header and cookie resolution apply otherwise.
pub async fn resolve_stream_token(
    state: &AppState,
    path_token: Option<&str>,
    headers: &HeaderMap,
) -> Option<String> {
    let session_id = match path_token {
        Some(id) => id.to_string(),
        None => session_id_from(headers)?,
    };
    let token = state
        .sessions
        .token_for(&session_id)
        .await
        .filter(|t| !t.is_empty())?;

    if state.auth.validate_token(&token).await {
        Some(token)
    } else {
        None
    }
}

/// Authenticated responses are cacheable privately only.
pub fn cache_private(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("private"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn header_trumps_cookie() {
        let map = headers(&[
            ("x-auth-token", "from-header"),
            ("cookie", "session_id=from-cookie"),
        ]);
        assert_eq!(session_id_from(&map).as_deref(), Some("from-header"));
    }

    #[test]
    fn cookie_is_used_without_header() {
        let map = headers(&[("cookie", "theme=dark; session_id=abc123; lang=en")]);
        assert_eq!(session_id_from(&map).as_deref(), Some("abc123"));
    }

    #[test]
    fn no_credentials_means_none() {
        assert_eq!(session_id_from(&HeaderMap::new()), None);
    }
}
