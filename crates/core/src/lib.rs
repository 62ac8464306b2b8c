//! Drover core library.
//!
//! Transport-independent pieces of the Drover gateway: the lowstate data
//! model, the wire-format registry, the error taxonomy, the event bus, the
//! session store, and the collaborator traits for the execution engine and
//! the external-authentication backend.
//!
//! The HTTP/WebSocket surface lives in the `drover-cli` crate; everything
//! here is usable without a running server.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod lowstate;
pub mod session;
pub mod wire;

pub use auth::{AuthBackend, AuthError, TokenInfo};
pub use config::GatewayConfig;
pub use engine::{Engine, EngineError, EngineReturn};
pub use error::GatewayError;
pub use event::{Event, EventBus};
pub use lowstate::{Batch, Descriptor};
pub use session::{Session, SessionStore};
pub use wire::WireFormat;
