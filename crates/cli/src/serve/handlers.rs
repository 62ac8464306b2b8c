//! Resource handlers for the gateway's HTTP surface.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};

use drover_core::auth::Credentials;
use drover_core::error::GatewayError;

use super::body::Decoded;
use super::exec::execute;
use super::negotiate::{status_of, ReplyFormat};
use super::state::AppState;
use super::token::{authed_from_headers, cache_private, login_redirect, Authed};

/// Fallback for unmatched routes.
pub(crate) async fn handle_not_found(fmt: ReplyFormat) -> Response {
    fmt.reply(
        StatusCode::NOT_FOUND,
        json!({"status": 404, "return": "not found"}),
    )
}

/// GET / — capability listing.
pub(crate) async fn handle_index(State(state): State<Arc<AppState>>, fmt: ReplyFormat) -> Response {
    fmt.ok(json!({
        "return": "Welcome",
        "clients": state.engine.clients(),
    }))
}

/// POST / — run a lowstate batch synchronously under the session's token.
pub(crate) async fn handle_root_post(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    auth: Authed,
    body: Decoded,
) -> Response {
    let raw = body.value.unwrap_or_else(|| json!([]));
    match execute(&state.engine, raw, None, Some(&auth.token)).await {
        Ok(outcome) => cache_private(fmt.reply(
            status_of(outcome.status()),
            json!({"return": outcome.results}),
        )),
        Err(err) => fmt.error(&err, state.config.debug),
    }
}

/// GET /login — the login prompt.
pub(crate) async fn handle_login_get(fmt: ReplyFormat) -> Response {
    let mut response = fmt.ok(json!({"status": 200, "return": "Please log in"}));
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Session"),
    );
    response
}

/// POST /login — exchange credentials for a session token.
pub(crate) async fn handle_login_post(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    body: Decoded,
) -> Response {
    let debug = state.config.debug;

    // The form-encoded decode path wraps the credentials in a batch.
    let creds_value = match body.value {
        Some(Value::Array(mut items)) if !items.is_empty() => items.remove(0),
        Some(value @ Value::Object(_)) => value,
        _ => return fmt.bare_error(&GatewayError::AuthFailed, debug),
    };
    let creds: Credentials = match serde_json::from_value(creds_value) {
        Ok(creds) => creds,
        Err(_) => return fmt.bare_error(&GatewayError::AuthFailed, debug),
    };

    let info = match state.auth.issue_token(&creds).await {
        Ok(info) => info,
        Err(err) => {
            tracing::debug!(user = %creds.username, error = %err, "login refused");
            return fmt.bare_error(&GatewayError::AuthFailed, debug);
        }
    };

    let perms = match state.config.perms_for(&info.eauth, &info.name) {
        Some(perms) => perms.to_vec(),
        None => {
            tracing::error!(
                eauth = %info.eauth,
                user = %info.name,
                "external_auth configuration missing for authenticated user"
            );
            return fmt.bare_error(
                &GatewayError::Internal(
                    "Configuration for external_auth could not be read.".into(),
                ),
                debug,
            );
        }
    };

    // The session inherits its timeout from the token lifetime.
    let timeout = Duration::from_secs_f64((info.expire - info.start).max(0.0));
    let session_id = state.sessions.create(info.token.clone(), timeout).await;
    state.stats.logins.fetch_add(1, Ordering::Relaxed);

    let mut response = fmt.ok(json!({
        "return": [{
            "token": session_id,
            "expire": info.expire,
            "start": info.start,
            "user": info.name,
            "eauth": info.eauth,
            "perms": perms,
        }]
    }));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        headers.insert("x-auth-token", value);
    }
    if let Ok(cookie) = HeaderValue::from_str(&format!("session_id={session_id}; Path=/; HttpOnly"))
    {
        headers.insert(header::SET_COOKIE, cookie);
    }
    response
}

/// POST /logout — destroy the active session and expire the cookie.
pub(crate) async fn handle_logout(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    auth: Authed,
) -> Response {
    let timeout = Duration::from_secs(state.config.session_timeout_secs);
    state.sessions.regenerate(&auth.session_id, timeout).await;

    let mut response = cache_private(fmt.ok(json!({"return": "Your token has been cleared"})));
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session_id=; Path=/; Expires=Thu, 01 Jan 1970 00:00:00 GMT"),
    );
    response
}

async fn minions_get(
    state: Arc<AppState>,
    fmt: ReplyFormat,
    auth: Authed,
    mid: Option<String>,
) -> Response {
    let raw = json!([{
        "client": "local",
        "tgt": mid.as_deref().unwrap_or("*"),
        "fun": "grains.items",
    }]);
    match execute(&state.engine, raw, None, Some(&auth.token)).await {
        Ok(outcome) => cache_private(fmt.reply(
            status_of(outcome.status()),
            json!({"return": outcome.results}),
        )),
        Err(err) => fmt.error(&err, state.config.debug),
    }
}

/// GET /minions — attributes of every minion.
pub(crate) async fn handle_minions_list(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    auth: Authed,
) -> Response {
    minions_get(state, fmt, auth, None).await
}

/// GET /minions/{mid} — attributes of one minion.
pub(crate) async fn handle_minions_get(
    State(state): State<Arc<AppState>>,
    Path(mid): Path<String>,
    fmt: ReplyFormat,
    auth: Authed,
) -> Response {
    minions_get(state, fmt, auth, Some(mid)).await
}

/// POST /minions — submit asynchronously; 202 with job ids and convenience
/// links.
pub(crate) async fn handle_minions_post(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    auth: Authed,
    body: Decoded,
) -> Response {
    let raw = body.value.unwrap_or_else(|| json!([]));
    let outcome = match execute(&state.engine, raw, Some("local_async"), Some(&auth.token)).await {
        Ok(outcome) => outcome,
        Err(err) => return fmt.error(&err, state.config.debug),
    };

    let links: Vec<Value> = outcome
        .results
        .iter()
        .filter_map(|r| r.get("jid").and_then(Value::as_str))
        .map(|jid| json!({"href": format!("/jobs/{jid}")}))
        .collect();

    let status = if outcome.error.is_some() {
        status_of(outcome.status())
    } else {
        StatusCode::ACCEPTED
    };
    cache_private(fmt.reply(
        status,
        json!({
            "return": outcome.results,
            "_links": {"jobs": links},
        }),
    ))
}

async fn jobs_get(
    state: Arc<AppState>,
    fmt: ReplyFormat,
    auth: Authed,
    jid: Option<String>,
) -> Response {
    let mut batch = vec![json!({
        "client": "runner",
        "fun": if jid.is_some() { "jobs.lookup_jid" } else { "jobs.list_jobs" },
        "jid": jid.as_deref(),
    })];
    if jid.is_some() {
        batch.push(json!({
            "client": "runner",
            "fun": "jobs.list_job",
            "jid": jid.as_deref(),
        }));
    }

    let outcome = match execute(&state.engine, Value::Array(batch), None, Some(&auth.token)).await {
        Ok(outcome) => outcome,
        Err(err) => return fmt.error(&err, state.config.debug),
    };

    let status = outcome.status();
    let mut results = outcome.results.into_iter();
    let job_ret = results.next().unwrap_or_else(|| json!({}));
    let mut envelope = Map::new();
    if jid.is_some() {
        let job_info = results.next().unwrap_or_else(|| json!({}));
        envelope.insert("info".to_string(), json!([job_info]));
    }
    envelope.insert("return".to_string(), json!([job_ret]));

    cache_private(fmt.reply(status_of(status), Value::Object(envelope)))
}

/// GET /jobs — list previously run jobs.
pub(crate) async fn handle_jobs_list(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    auth: Authed,
) -> Response {
    jobs_get(state, fmt, auth, None).await
}

/// GET /jobs/{jid} — one job's metadata and return.
pub(crate) async fn handle_jobs_get(
    State(state): State<Arc<AppState>>,
    Path(jid): Path<String>,
    fmt: ReplyFormat,
    auth: Authed,
) -> Response {
    jobs_get(state, fmt, auth, Some(jid)).await
}

/// A /run descriptor must carry its own credentials: either a token or the
/// full username/password/eauth triple.
fn has_call_credentials(entry: &Value) -> bool {
    let Some(map) = entry.as_object() else {
        // Shape errors are reported by the executor.
        return true;
    };
    map.contains_key("token")
        || ["username", "password", "eauth"]
            .iter()
            .all(|k| map.contains_key(*k))
}

/// POST /run — one-off commands bypassing session handling.
pub(crate) async fn handle_run(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    body: Decoded,
) -> Response {
    let raw = body.value.unwrap_or_else(|| json!([]));

    if let Value::Array(entries) = &raw {
        if !entries.iter().all(has_call_credentials) {
            return fmt.bare_error(&GatewayError::AuthRequired, state.config.debug);
        }
    }

    match execute(&state.engine, raw, None, None).await {
        Ok(outcome) => fmt.reply(
            status_of(outcome.status()),
            json!({"return": outcome.results}),
        ),
        Err(err) => fmt.bare_error(&err, state.config.debug),
    }
}

async fn fire_hook(
    state: Arc<AppState>,
    fmt: ReplyFormat,
    tag_suffix: &str,
    headers: HeaderMap,
    body: Decoded,
) -> Response {
    if !state.config.webhook_disable_auth && authed_from_headers(&state, &headers).await.is_none() {
        return login_redirect(&headers);
    }

    let tag = if tag_suffix.is_empty() {
        "drover/hook".to_string()
    } else {
        format!("drover/hook/{}", tag_suffix.trim_matches('/'))
    };

    // The posted body rides along unwrapped, whatever its content type was.
    let post = match (body.wrapped, body.value) {
        (true, Some(Value::Array(mut items))) if !items.is_empty() => items.remove(0),
        (_, Some(value)) => value,
        (_, None) => json!({}),
    };

    let captured: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();

    state.bus.publish(
        tag,
        json!({
            "post": post,
            "headers": captured,
        }),
    );
    fmt.ok(json!({"success": true}))
}

/// POST /hook — fire an event with the base tag.
pub(crate) async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    headers: HeaderMap,
    body: Decoded,
) -> Response {
    fire_hook(state, fmt, "", headers, body).await
}

/// POST /hook/{...} — fire an event with the tag derived from the path.
pub(crate) async fn handle_webhook_tagged(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    fmt: ReplyFormat,
    headers: HeaderMap,
    body: Decoded,
) -> Response {
    fire_hook(state, fmt, &tag, headers, body).await
}

/// GET /stats — operational counters.
pub(crate) async fn handle_stats(
    State(state): State<Arc<AppState>>,
    fmt: ReplyFormat,
    _auth: Authed,
) -> Response {
    cache_private(fmt.ok(state.stats.snapshot()))
}

/// GET /app[/...] — serve the configured bootstrap file no matter the
/// trailing path, for HTML5 history API clients.
pub(crate) async fn handle_app(State(state): State<Arc<AppState>>) -> Response {
    let Some(path) = &state.config.app else {
        // Route is only registered when `app` is configured.
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed to read app file");
            ReplyFormat(drover_core::wire::WireFormat::Json).bare_error(
                &GatewayError::Internal(format!("failed to read app file: {err}")),
                state.config.debug,
            )
        }
    }
}
