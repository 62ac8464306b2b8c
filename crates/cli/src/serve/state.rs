//! Application state and operational counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use drover_core::{AuthBackend, Engine, EventBus, GatewayConfig, SessionStore};

/// Counters exposed by `GET /stats`.
#[derive(Debug, Default)]
pub struct Stats {
    pub requests_total: AtomicU64,
    pub requests_in_flight: AtomicU64,
    pub sse_clients: AtomicU64,
    pub ws_clients: AtomicU64,
    pub events_delivered: AtomicU64,
    pub events_dropped: AtomicU64,
    pub logins: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "requests_total": self.requests_total.load(Ordering::Relaxed),
            "requests_in_flight": self.requests_in_flight.load(Ordering::Relaxed),
            "sse_clients": self.sse_clients.load(Ordering::Relaxed),
            "ws_clients": self.ws_clients.load(Ordering::Relaxed),
            "events_delivered": self.events_delivered.load(Ordering::Relaxed),
            "events_dropped": self.events_dropped.load(Ordering::Relaxed),
            "logins": self.logins.load(Ordering::Relaxed),
        })
    }
}

/// Shared state behind every handler. Collaborators (engine, auth backend)
/// are trait objects so tests can substitute their own.
pub struct AppState {
    pub config: GatewayConfig,
    pub engine: Arc<dyn Engine>,
    pub auth: Arc<dyn AuthBackend>,
    pub bus: EventBus,
    pub sessions: SessionStore,
    pub stats: Stats,
}

impl AppState {
    pub fn new(config: GatewayConfig, engine: Arc<dyn Engine>, auth: Arc<dyn AuthBackend>) -> Self {
        let bus = EventBus::new(config.event_buffer);
        AppState {
            config,
            engine,
            auth,
            bus,
            sessions: SessionStore::new(),
            stats: Stats::default(),
        }
    }
}
