//! The external-authentication collaborator.
//!
//! Tokens are created and owned by the auth backend; the gateway only
//! inspects and forwards them. [`StaticAuth`] validates credentials against
//! the configured user table and is the backend wired up by the demo binary
//! and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::GatewayConfig;

/// Credentials presented to `POST /login` and `POST /run`.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Name of the eauth backend to validate against.
    pub eauth: String,
}

/// An issued token and its metadata.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub token: String,
    /// Principal name.
    pub name: String,
    pub eauth: String,
    /// Issue time, seconds since the epoch.
    pub start: f64,
    /// Expiry time, seconds since the epoch.
    pub expire: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failed for user '{0}'")]
    BadCredentials(String),

    #[error("unknown eauth backend: {0}")]
    UnknownBackend(String),

    #[error("auth backend unavailable: {0}")]
    Unavailable(String),
}

/// The authentication backend interface consumed by the gateway.
#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    /// Validate credentials and issue a token.
    async fn issue_token(&self, creds: &Credentials) -> Result<TokenInfo, AuthError>;

    /// Whether the given token is known and unexpired.
    async fn validate_token(&self, token: &str) -> bool;
}

/// Token lifetime issued by [`StaticAuth`]: 12 hours.
const TOKEN_TTL_SECS: f64 = 43200.0;

/// Generate an opaque 128-bit hex token or session identifier.
pub fn opaque_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

/// Config-driven auth backend: each eauth backend name maps to a user table
/// with passwords and permission lists.
pub struct StaticAuth {
    users: HashMap<String, HashMap<String, crate::config::UserAuth>>,
    issued: Mutex<HashMap<String, TokenInfo>>,
}

impl StaticAuth {
    pub fn from_config(config: &GatewayConfig) -> Self {
        StaticAuth {
            users: config.external_auth.clone(),
            issued: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AuthBackend for StaticAuth {
    async fn issue_token(&self, creds: &Credentials) -> Result<TokenInfo, AuthError> {
        let backend = self
            .users
            .get(&creds.eauth)
            .ok_or_else(|| AuthError::UnknownBackend(creds.eauth.clone()))?;
        backend
            .get(&creds.username)
            .filter(|u| u.password == creds.password)
            .ok_or_else(|| AuthError::BadCredentials(creds.username.clone()))?;

        let start = OffsetDateTime::now_utc().unix_timestamp() as f64;
        let info = TokenInfo {
            token: opaque_id(),
            name: creds.username.clone(),
            eauth: creds.eauth.clone(),
            start,
            expire: start + TOKEN_TTL_SECS,
        };
        self.issued
            .lock()
            .await
            .insert(info.token.clone(), info.clone());
        Ok(info)
    }

    async fn validate_token(&self, token: &str) -> bool {
        let now = OffsetDateTime::now_utc().unix_timestamp() as f64;
        let mut issued = self.issued.lock().await;
        match issued.get(token) {
            Some(info) if info.expire > now => true,
            Some(_) => {
                tracing::debug!("evicting expired token");
                issued.remove(token);
                false
            }
            None => false,
        }
    }
}
