//! The event stream multiplexer: SSE and WebSocket delivery of the internal
//! event bus.
//!
//! Every connection owns an independent bus subscription with a bounded
//! buffer; a slow or disconnected client only ever loses its own events
//! (drop-oldest on lag) and never holds up the bus or another subscriber.
//! Dropping the connection drops the subscription, so disconnects
//! unsubscribe promptly without any polling.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use drover_core::error::GatewayError;
use drover_core::event::{BusMessage, Event, Subscription};

use super::negotiate::default_error_response;
use super::state::AppState;
use super::token::{login_redirect, resolve_stream_token};

/// Retry-interval advisory sent once at SSE stream start, in milliseconds.
const SSE_RETRY_MS: u32 = 400;

/// Keeps the active-subscriber gauges honest: increments on connect,
/// decrements when the connection (and with it the stream state) is dropped.
struct StreamGuard {
    gauge: Arc<AppState>,
    counter: fn(&AppState) -> &AtomicU64,
}

impl StreamGuard {
    fn sse(state: Arc<AppState>) -> Self {
        let guard = StreamGuard {
            gauge: state,
            counter: |s| &s.stats.sse_clients,
        };
        (guard.counter)(&guard.gauge).fetch_add(1, Ordering::Relaxed);
        guard
    }

    fn ws(state: Arc<AppState>) -> Self {
        let guard = StreamGuard {
            gauge: state,
            counter: |s| &s.stats.ws_clients,
        };
        (guard.counter)(&guard.gauge).fetch_add(1, Ordering::Relaxed);
        guard
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        (self.counter)(&self.gauge).fetch_sub(1, Ordering::Relaxed);
    }
}

/// Pull the next deliverable event off a subscription, skipping lag notices
/// and events whose payload cannot be serialized. Returns `None` when the
/// bus is gone.
async fn next_event(sub: &mut Subscription, state: &AppState) -> Option<(Event, String)> {
    loop {
        match sub.recv().await {
            Some(BusMessage::Event(event)) => match serde_json::to_string(&event.to_wire()) {
                Ok(encoded) => {
                    state.stats.events_delivered.fetch_add(1, Ordering::Relaxed);
                    return Some((event, encoded));
                }
                Err(err) => {
                    // A bad payload must not kill the stream.
                    tracing::warn!(tag = %event.tag, error = %err, "skipping unserializable event");
                    state.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            Some(BusMessage::Lagged(skipped)) => {
                tracing::warn!(skipped, "subscriber lagged; oldest events dropped");
                state
                    .stats
                    .events_dropped
                    .fetch_add(skipped, Ordering::Relaxed);
            }
            None => return None,
        }
    }
}

struct SseState {
    sub: Subscription,
    state: Arc<AppState>,
    _guard: StreamGuard,
    sent_retry: bool,
}

async fn events_stream(state: Arc<AppState>, path_token: Option<&str>, headers: HeaderMap) -> Response {
    if resolve_stream_token(&state, path_token, &headers)
        .await
        .is_none()
    {
        return login_redirect(&headers);
    }

    // The session lock was released inside the token lookup; from here the
    // connection holds only its own subscription.
    let sub = state.bus.subscribe();
    let guard = StreamGuard::sse(state.clone());
    let frames = futures::stream::unfold(
        SseState {
            sub,
            state,
            _guard: guard,
            sent_retry: false,
        },
        |mut st| async move {
            if !st.sent_retry {
                st.sent_retry = true;
                let advisory = format!("retry: {SSE_RETRY_MS}\n");
                return Some((Ok::<_, Infallible>(Bytes::from(advisory)), st));
            }
            let (event, encoded) = next_event(&mut st.sub, &st.state).await?;
            let frame = format!("tag: {}\ndata: {}\n\n", event.tag, encoded);
            Some((Ok(Bytes::from(frame)), st))
        },
    );

    let mut response = Body::from_stream(frames).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream;charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// GET /events — SSE stream of the event bus.
pub(crate) async fn handle_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    events_stream(state, None, headers).await
}

/// GET /events/{token} — URL-embedded session id, the workaround for
/// browser `EventSource` clients that cannot set custom headers.
pub(crate) async fn handle_events_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    events_stream(state, Some(&token), headers).await
}

/// Pre-process an event into the friendlier structural form requested with
/// `format_events`. Richer shaping belongs to a downstream consumer; the
/// gateway only classifies the tag.
fn format_event(event: &Event) -> Value {
    let kind = if event.tag.contains("/job/") && event.tag.ends_with("/new") {
        "job_start"
    } else if event.tag.contains("/ret/") {
        "job_return"
    } else if event.tag.contains("/hook/") {
        "hook"
    } else {
        "event"
    };
    json!({
        "kind": kind,
        "tag": event.tag,
        "data": event.data,
    })
}

async fn ws_pump(
    mut socket: WebSocket,
    mut sub: Subscription,
    state: Arc<AppState>,
    format_events: bool,
    _guard: StreamGuard,
) {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    // Client chatter ("websocket client ready") is ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            outgoing = next_event(&mut sub, &state) => {
                let Some((event, encoded)) = outgoing else { break };
                let text = if format_events {
                    match serde_json::to_string(&format_event(&event)) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::warn!(tag = %event.tag, error = %err, "skipping unformattable event");
                            continue;
                        }
                    }
                } else {
                    format!("data: {encoded}\n\n")
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("websocket connection closed");
}

async fn ws_stream(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    path_token: Option<&str>,
    params: HashMap<String, String>,
    headers: HeaderMap,
) -> Response {
    if resolve_stream_token(&state, path_token, &headers)
        .await
        .is_none()
    {
        // Programmatic endpoint: a bare 401, no login redirect.
        return default_error_response(&GatewayError::AuthRequired);
    }

    let format_events = params.contains_key("format_events");
    let sub = state.bus.subscribe();
    let guard = StreamGuard::ws(state.clone());
    ws.on_upgrade(move |socket| ws_pump(socket, sub, state, format_events, guard))
}

/// GET /ws — WebSocket delivery of the event bus.
pub(crate) async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    ws_stream(ws, state, None, params, headers).await
}

/// GET /ws/{token} — URL-embedded session id, as for /events.
pub(crate) async fn handle_ws_token(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    ws_stream(ws, state, Some(&token), params, headers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn event(tag: &str) -> Event {
        Event {
            tag: tag.to_string(),
            data: json!({"jid": "1"}),
            stamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn format_event_classifies_tags() {
        assert_eq!(format_event(&event("drover/job/123/new"))["kind"], "job_start");
        assert_eq!(format_event(&event("drover/job/123/ret/ms-0"))["kind"], "job_return");
        assert_eq!(format_event(&event("drover/hook/ci/build"))["kind"], "hook");
        assert_eq!(format_event(&event("drover/presence/change"))["kind"], "event");
    }
}
