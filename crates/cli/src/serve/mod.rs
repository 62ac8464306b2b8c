//! `drover serve` -- the HTTP/WebSocket gateway surface.
//!
//! An inbound request passes body decoding, the session/token bridge, the
//! resource handler (which may run a lowstate batch through the engine), and
//! content negotiation on the way out. Streaming resources skip the
//! decoder/negotiator and attach to the event bus for the connection's
//! lifetime.
//!
//! Endpoints:
//! - GET  /                 - capability listing
//! - POST /                 - run a lowstate batch synchronously (auth)
//! - GET  /login            - login prompt
//! - POST /login            - exchange credentials for a session token
//! - POST /logout           - invalidate the current session (auth)
//! - GET  /minions[/{mid}]  - minion attributes (auth)
//! - POST /minions          - asynchronous submission, 202 + job links (auth)
//! - GET  /jobs[/{jid}]     - job listing / one job's result (auth)
//! - POST /run              - one-off commands with per-call credentials
//! - GET  /events[/{token}] - SSE stream of the event bus
//! - GET  /ws[/{token}]     - WebSocket stream of the event bus
//! - POST /hook[/{...}]     - fire an event onto the bus (configurable path)
//! - GET  /stats            - operational counters (auth)
//! - GET  /app[/{...}]      - single-page-app bootstrap file (configurable)

mod body;
mod events;
mod exec;
mod handlers;
mod negotiate;
mod state;
mod token;

pub use state::{AppState, Stats};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::Method;
use axum::middleware::{self as axum_middleware, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};

use self::events::{handle_events, handle_events_token, handle_ws, handle_ws_token};
use self::handlers::{
    handle_app, handle_index, handle_jobs_get, handle_jobs_list, handle_login_get,
    handle_login_post, handle_logout, handle_minions_get, handle_minions_list,
    handle_minions_post, handle_not_found, handle_root_post, handle_run, handle_stats,
    handle_webhook, handle_webhook_tagged,
};

/// Request accounting middleware.
async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    use std::sync::atomic::Ordering;
    state.stats.requests_total.fetch_add(1, Ordering::Relaxed);
    state.stats.requests_in_flight.fetch_add(1, Ordering::Relaxed);
    let response = next.run(request).await;
    state.stats.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
    response
}

/// Refuse requests from outside the configured allowlist, when one is set.
async fn verify_source_ip(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(allowed) = &state.config.authorized_ips {
        if !allowed.contains(&addr.ip()) {
            tracing::warn!(ip = %addr.ip(), "blocked request from unauthorized address");
            return negotiate::serialize(
                drover_core::wire::WireFormat::Json,
                axum::http::StatusCode::FORBIDDEN,
                &serde_json::json!({"status": 403, "return": "Bad IP"}),
            );
        }
    }
    next.run(request).await
}

/// Assemble the routing table. Short request/response resources sit behind a
/// bounded concurrency limit; the streaming resources do not, so long-lived
/// connections never starve the request pool.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mut api = Router::new()
        .route("/", get(handle_index).post(handle_root_post))
        .route("/login", get(handle_login_get).post(handle_login_post))
        .route("/logout", post(handle_logout))
        .route("/minions", get(handle_minions_list).post(handle_minions_post))
        .route("/minions/{mid}", get(handle_minions_get))
        .route("/jobs", get(handle_jobs_list))
        .route("/jobs/{jid}", get(handle_jobs_get))
        .route("/run", post(handle_run))
        .route("/stats", get(handle_stats));

    // The webhook path is overridable from the configuration.
    let hook = format!("/{}", state.config.webhook_url.trim_matches('/'));
    api = api
        .route(&hook, post(handle_webhook))
        .route(&format!("{hook}/{{*tag}}"), post(handle_webhook_tagged));

    // The single-page-app route exists only when a bootstrap file is set.
    if state.config.app.is_some() {
        let app_path = format!("/{}", state.config.app_path.trim_matches('/'));
        api = api
            .route(&app_path, get(handle_app))
            .route(&format!("{app_path}/{{*rest}}"), get(handle_app));
    }

    let api = api.layer(ConcurrencyLimitLayer::new(state.config.thread_pool));

    let streams = Router::new()
        .route("/events", get(handle_events))
        .route("/events/{token}", get(handle_events_token))
        .route("/ws", get(handle_ws))
        .route("/ws/{token}", get(handle_ws_token));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    api.merge(streams)
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            verify_source_ip,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(state.config.max_request_body_size))
        .with_state(state)
}

/// Serve the gateway on an already-bound listener. Used by [`start_server`]
/// and driven directly by the integration tests.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
) -> std::io::Result<()> {
    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Bind and serve until Ctrl+C.
pub async fn start_server(state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "drover gateway listening");

    let app = build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("received shutdown signal");
}
